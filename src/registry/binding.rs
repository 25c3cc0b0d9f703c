/// Single-role binding cell tying a bound protocol handle to the registry
/// id it was announced under.
///
/// A cell is either unbound or bound to exactly one global. Binding an
/// occupied cell is refused, so a duplicate announcement of a single-role
/// interface falls through to other binders. Releasing requires the
/// matching registry id, which makes revocation of an unrelated global a
/// no-op.
#[derive(Debug)]
pub struct RoleBinding<H> {
    bound: Option<(u32, H)>,
}

impl<H> Default for RoleBinding<H> {
    fn default() -> Self {
        RoleBinding { bound: None }
    }
}

impl<H> RoleBinding<H> {
    /// Creates an unbound cell.
    pub fn new() -> Self {
        Default::default()
    }

    /// Installs `handle` for the global `id`.
    ///
    /// Returns `false` without touching the cell when it is already bound.
    pub fn install(&mut self, id: u32, handle: H) -> bool {
        if self.bound.is_some() {
            return false;
        }
        self.bound = Some((id, handle));
        true
    }

    /// Takes the handle out of the cell if it is bound to `id`.
    pub fn release_if(&mut self, id: u32) -> Option<H> {
        match self.bound {
            Some((bound_id, _)) if bound_id == id => self.bound.take().map(|(_, handle)| handle),
            _ => None,
        }
    }

    /// Takes the handle out of the cell unconditionally.
    pub fn release(&mut self) -> Option<(u32, H)> {
        self.bound.take()
    }

    /// The bound handle, if any.
    pub fn handle(&self) -> Option<&H> {
        self.bound.as_ref().map(|(_, handle)| handle)
    }

    /// The registry id this cell is bound to, if any.
    pub fn registry_id(&self) -> Option<u32> {
        self.bound.as_ref().map(|(id, _)| *id)
    }

    /// Whether the cell currently holds a binding.
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_is_present_exactly_while_bound() {
        let mut cell: RoleBinding<&'static str> = RoleBinding::new();
        assert!(cell.handle().is_none());
        assert!(!cell.is_bound());

        assert!(cell.install(7, "manager"));
        assert_eq!(cell.handle(), Some(&"manager"));
        assert_eq!(cell.registry_id(), Some(7));

        assert_eq!(cell.release_if(7), Some("manager"));
        assert!(cell.handle().is_none());
        assert!(cell.registry_id().is_none());
    }

    #[test]
    fn second_install_is_refused() {
        let mut cell = RoleBinding::new();
        assert!(cell.install(1, "first"));
        assert!(!cell.install(2, "second"));

        // The original binding must be untouched.
        assert_eq!(cell.registry_id(), Some(1));
        assert_eq!(cell.handle(), Some(&"first"));
    }

    #[test]
    fn release_requires_the_matching_id() {
        let mut cell = RoleBinding::new();
        cell.install(3, "bound");

        assert_eq!(cell.release_if(4), None);
        assert!(cell.is_bound());
        assert_eq!(cell.release_if(3), Some("bound"));
    }

    #[test]
    fn rebinding_after_release_is_allowed() {
        let mut cell = RoleBinding::new();
        cell.install(1, "first");
        cell.release_if(1);

        assert!(cell.install(2, "second"));
        assert_eq!(cell.registry_id(), Some(2));
    }

    #[test]
    fn unconditional_release_reports_the_id() {
        let mut cell = RoleBinding::new();
        cell.install(9, "bound");
        assert_eq!(cell.release(), Some((9, "bound")));
        assert_eq!(cell.release(), None);
    }
}
