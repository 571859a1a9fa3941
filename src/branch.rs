use std::fmt;

use smartstring::alias::String as SmartString;

pub type BranchName = SmartString;

/// Numeric id of a registered branch. The id doubles as the branch's rank:
/// positions break atom ties by comparing these, so replicas must agree on
/// registration order (the registry table is part of the wire surface).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BranchId(pub u16);

pub const BRANCH_INVALID: BranchId = BranchId(u16::MAX);

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Registry mapping branch names to ids with a stable total rank.
///
/// Insertion order is observable only through the rank of the returned ids.
#[derive(Clone, Debug, Default)]
pub struct BranchOrder {
    names: Vec<BranchName>,
}

impl BranchOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, name: &str) -> BranchId {
        if let Some(id) = self.get(name) {
            id
        } else {
            self.names.push(SmartString::from(name));
            BranchId((self.names.len() - 1) as u16)
        }
    }

    pub fn get(&self, name: &str) -> Option<BranchId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| BranchId(i as u16))
    }

    pub fn name(&self, id: BranchId) -> Option<&str> {
        self.names.get(id.0 as usize).map(|n| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Ranks in registration order, for encoding the envelope table.
    pub fn iter(&self) -> impl Iterator<Item = (BranchId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (BranchId(i as u16), n.as_str()))
    }
}
