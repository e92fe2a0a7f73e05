//! Integer-keyed identities for objects that would otherwise need cyclic
//! owning references (transfer <-> connection, interface <-> connection,
//! master <-> subflow). Everything is owned by an arena in [`crate::transfer_manager::TransferManager`]
//! or [`crate::interface::Interface`] and referred to elsewhere by id, per the
//! teacher's own id-based resolution of cyclic graphs (see `HostId` / the
//! `Host` arena in the teacher's `core::work` module).

use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(TransferId);
id_type!(ConnId);
id_type!(InterfaceId);

/// Process-wide-looking but actually per-manager monotonic counters, mirroring
/// the teacher's `ObjectCounter`/`connectionCounterCounter` style but scoped to
/// a single `TransferManager` so that independent runs built from the same
/// template don't share mutable global state.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_transfer: u64,
    next_conn: u64,
    next_interface: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_transfer(&mut self) -> TransferId {
        let id = TransferId::new(self.next_transfer);
        self.next_transfer += 1;
        id
    }

    pub fn next_conn(&mut self) -> ConnId {
        let id = ConnId::new(self.next_conn);
        self.next_conn += 1;
        id
    }

    pub fn next_interface(&mut self) -> InterfaceId {
        let id = InterfaceId::new(self.next_interface);
        self.next_interface += 1;
        id
    }
}
