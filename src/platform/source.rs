//! [`EventSource`] adapter for driving a [`Smelter`] from calloop.

use std::io;
use std::os::unix::io::OwnedFd;

use calloop::generic::Generic;
use calloop::{EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory};

use super::Smelter;

/// Level-triggered source pumping a [`Smelter`] whenever its connection
/// becomes readable.
///
/// The callback receives the number of dispatched events and the pumped
/// [`Smelter`], after every observer notification of the pass has been
/// delivered.
#[derive(Debug)]
pub struct SmelterSource {
    smelter: Smelter,
    fd: Generic<OwnedFd>,
}

impl SmelterSource {
    /// Wraps `smelter`, duplicating its connection fd for polling.
    pub fn new(smelter: Smelter) -> io::Result<SmelterSource> {
        let fd = smelter.connection().backend().poll_fd().try_clone_to_owned()?;
        Ok(SmelterSource {
            smelter,
            fd: Generic::new(fd, Interest::READ, Mode::Level),
        })
    }

    /// The wrapped platform connection.
    pub fn smelter(&self) -> &Smelter {
        &self.smelter
    }

    /// Mutable access, for pumping outside the loop or creating objects.
    pub fn smelter_mut(&mut self) -> &mut Smelter {
        &mut self.smelter
    }

    /// Unwraps the source again.
    pub fn into_smelter(self) -> Smelter {
        self.smelter
    }
}

impl EventSource for SmelterSource {
    type Event = usize;
    type Metadata = Smelter;
    type Ret = ();
    type Error = io::Error;

    fn process_events<F: FnMut(usize, &mut Smelter)>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: F,
    ) -> io::Result<PostAction> {
        let SmelterSource { smelter, fd } = self;
        fd.process_events(readiness, token, |_, _| {
            let dispatched = smelter.pump_until_empty();
            callback(dispatched, smelter);
            // Requests made by the callback should reach the compositor
            // before the loop goes back to sleep.
            smelter.flush();
            Ok(PostAction::Continue)
        })
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.fd.register(poll, token_factory)
    }

    fn reregister(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.fd.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.fd.unregister(poll)
    }
}
