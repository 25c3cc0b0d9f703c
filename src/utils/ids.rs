macro_rules! id_gen {
    ($mod_name:ident) => {
        mod $mod_name {
            use once_cell::sync::Lazy;
            use std::{collections::HashSet, sync::Mutex};

            static IDS: Lazy<Mutex<IdTable>> = Lazy::new(Mutex::default);

            #[derive(Default)]
            struct IdTable {
                live: HashSet<usize>,
                next: usize,
            }

            pub(crate) fn next() -> usize {
                let table = &mut *IDS.lock().unwrap();

                if table.live.len() == usize::MAX {
                    panic!("Out of ids");
                }

                while !table.live.insert(table.next) {
                    table.next = table.next.wrapping_add(1);
                }

                let id = table.next;
                table.next = table.next.wrapping_add(1);

                id
            }

            pub(crate) fn release(id: usize) -> bool {
                IDS.lock().unwrap().live.remove(&id)
            }
        }
    };
}

pub(crate) use id_gen;
