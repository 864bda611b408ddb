use std::fmt;

/// An ordered set of replica ids that take part together in one instance of a collective.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct ReplicaGroup {
    pub replica_ids: Vec<u32>,
}

impl ReplicaGroup {
    pub fn new(replica_ids: impl Into<Vec<u32>>) -> Self {
        Self {
            replica_ids: replica_ids.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.replica_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replica_ids.is_empty()
    }
}

/// Attributes shared by every collective instruction.
///
/// An empty `replica_groups` list means a single group containing every participant. Otherwise
/// the groups are disjoint and together cover every participant.
///
/// A collective with a `channel_id` communicates across partitions (and, with
/// `use_global_device_ids`, names flattened device ids rather than replica ids in its groups).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct CollectiveAttrs {
    pub replica_groups: Vec<ReplicaGroup>,
    pub channel_id: Option<u64>,
    pub use_global_device_ids: bool,
}

impl CollectiveAttrs {
    /// A cross-replica collective over the given groups.
    pub fn cross_replica(replica_groups: impl Into<Vec<ReplicaGroup>>) -> Self {
        Self {
            replica_groups: replica_groups.into(),
            channel_id: None,
            use_global_device_ids: false,
        }
    }

    /// A channel-qualified collective over the given groups.
    pub fn with_channel(
        channel_id: u64,
        replica_groups: impl Into<Vec<ReplicaGroup>>,
        use_global_device_ids: bool,
    ) -> Self {
        Self {
            replica_groups: replica_groups.into(),
            channel_id: Some(channel_id),
            use_global_device_ids,
        }
    }

    #[must_use]
    pub fn is_cross_replica(&self) -> bool {
        self.channel_id.is_none()
    }

    /// Returns true if a single group contains all `participants`.
    #[must_use]
    pub fn spans_all(&self, participants: usize) -> bool {
        match self.replica_groups.as_slice() {
            [] => true,
            [group] => group.len() == participants,
            _ => false,
        }
    }
}

impl fmt::Display for CollectiveAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica_groups={{")?;
        for (i, group) in self.replica_groups.iter().enumerate() {
            if i != 0 {
                write!(f, ",")?;
            }
            write!(f, "{{")?;
            for (j, id) in group.replica_ids.iter().enumerate() {
                if j != 0 {
                    write!(f, ",")?;
                }
                write!(f, "{id}")?;
            }
            write!(f, "}}")?;
        }
        write!(f, "}}")?;

        if let Some(channel_id) = self.channel_id {
            write!(f, ", channel_id={channel_id}")?;
        }
        if self.use_global_device_ids {
            write!(f, ", use_global_device_ids=true")?;
        }
        Ok(())
    }
}
