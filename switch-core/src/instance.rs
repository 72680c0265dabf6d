// Copyright 2024 Oxide Computer Company

/// Origin of a packet as it enters the current pipeline stage. Stamped on
/// every packet or copy before (re)entering a pipeline, and readable by the
/// forwarding program through `standard_metadata.instance_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum InstanceType {
    Normal = 0,
    IngressClone = 1,
    EgressClone = 2,
    Coalesced = 3,
    Recirc = 4,
    Replication = 5,
    Resubmit = 6,
}

impl InstanceType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl From<InstanceType> for i64 {
    fn from(t: InstanceType) -> i64 {
        t.as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_match_wire_values() {
        assert_eq!(InstanceType::Normal.as_i64(), 0);
        assert_eq!(InstanceType::IngressClone.as_i64(), 1);
        assert_eq!(InstanceType::EgressClone.as_i64(), 2);
        assert_eq!(InstanceType::Coalesced.as_i64(), 3);
        assert_eq!(InstanceType::Recirc.as_i64(), 4);
        assert_eq!(InstanceType::Replication.as_i64(), 5);
        assert_eq!(InstanceType::Resubmit.as_i64(), 6);
    }
}
