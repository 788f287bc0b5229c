use std::fmt::{Display, Formatter};

/// Handle to an interned multi-channel state inside a [`ChannelStore`][crate::channel::ChannelStore].
///
/// Two handles from the same store are equal iff the channel contents are equal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChRef(u32);

impl ChRef {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the index of the state in its store.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for ChRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Handle to an observed configuration owned by a [`Gfsm`][crate::gfsm::Gfsm].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObsId(u32);

impl ObsId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for ObsId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Handle to a partition of a [`Gfsm`][crate::gfsm::Gfsm].
///
/// Ids are never reused: a removed partition keeps its id retired.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PartId(u32);

impl PartId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for PartId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}
