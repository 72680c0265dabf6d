// Copyright 2024 Oxide Computer Company

use std::collections::HashMap;
use std::sync::Arc;

/// Standard metadata fields present on every standard-metadata-conformant
/// program.
pub const STANDARD_METADATA_FIELDS: &[(&str, u32)] = &[
    ("standard_metadata.ingress_port", 16),
    ("standard_metadata.packet_length", 32),
    ("standard_metadata.instance_type", 32),
    ("standard_metadata.egress_spec", 16),
    ("standard_metadata.clone_spec", 32),
    ("standard_metadata.egress_port", 16),
];

/// Queueing metadata is all-or-none: if any of the first four are declared,
/// all four must be. `qid` is independently optional.
pub const QUEUEING_METADATA_FIELDS: &[(&str, u32)] = &[
    ("queueing_metadata.enq_timestamp", 64),
    ("queueing_metadata.enq_qdepth", 32),
    ("queueing_metadata.deq_timedelta", 64),
    ("queueing_metadata.deq_qdepth", 32),
];

pub const QUEUEING_METADATA_QID_FIELD: (&str, u32) = ("queueing_metadata.qid", 32);

pub const INTRINSIC_METADATA_FIELDS: &[(&str, u32)] = &[
    ("intrinsic_metadata.ingress_global_timestamp", 64),
    ("intrinsic_metadata.lf_field_list", 32),
    ("intrinsic_metadata.mcast_grp", 32),
    ("intrinsic_metadata.resubmit_flag", 32),
    ("intrinsic_metadata.egress_rid", 32),
    ("intrinsic_metadata.recirculate_flag", 32),
];

/// A single field's declaration: its bit width, and whether it is metadata
/// (zeroed by `reset_metadata`) as opposed to a header field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub width_bits: u32,
    pub is_metadata: bool,
}

/// The set of named fields a compiled forwarding program declares. Shared
/// (via `Arc`) across every PHV instance created while a program is loaded;
/// cloning a packet never clones the catalog, only the field values.
#[derive(Debug, Default)]
pub struct FieldCatalog {
    specs: HashMap<String, FieldSpec>,
}

impl FieldCatalog {
    pub fn builder() -> FieldCatalogBuilder {
        FieldCatalogBuilder::default()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<FieldSpec> {
        self.specs.get(name).copied()
    }

    pub fn metadata_fields(&self) -> impl Iterator<Item = &str> {
        self.specs
            .iter()
            .filter(|(_, s)| s.is_metadata)
            .map(|(n, _)| n.as_str())
    }
}

#[derive(Default)]
pub struct FieldCatalogBuilder {
    specs: HashMap<String, FieldSpec>,
}

impl FieldCatalogBuilder {
    pub fn field(mut self, name: &str, width_bits: u32, is_metadata: bool) -> Self {
        self.specs.insert(
            name.to_string(),
            FieldSpec {
                width_bits,
                is_metadata,
            },
        );
        self
    }

    pub fn fields(mut self, fields: &[(&str, u32)], is_metadata: bool) -> Self {
        for (name, width) in fields {
            self = self.field(name, *width, is_metadata);
        }
        self
    }

    /// Registers the six required `standard_metadata` fields.
    pub fn with_standard_metadata(self) -> Self {
        self.fields(STANDARD_METADATA_FIELDS, true)
    }

    pub fn with_queueing_metadata(self, with_qid: bool) -> Self {
        let s = self.fields(QUEUEING_METADATA_FIELDS, true);
        if with_qid {
            s.field(QUEUEING_METADATA_QID_FIELD.0, QUEUEING_METADATA_QID_FIELD.1, true)
        } else {
            s
        }
    }

    pub fn with_intrinsic_metadata(self, fields: &[&str]) -> Self {
        let mut s = self;
        for name in fields {
            if let Some((_, w)) = INTRINSIC_METADATA_FIELDS.iter().find(|(n, _)| n == name) {
                s = s.field(name, *w, true);
            }
        }
        s
    }

    pub fn build(self) -> Arc<FieldCatalog> {
        Arc::new(FieldCatalog { specs: self.specs })
    }
}

/// A single named field's value within one packet's PHV.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub width_bits: u32,
    value: u64,
}

impl Field {
    fn new(width_bits: u32) -> Self {
        Self {
            width_bits,
            value: 0,
        }
    }

    pub fn get_int(&self) -> i64 {
        self.value as i64
    }

    pub fn get_uint(&self) -> u64 {
        self.value
    }

    pub fn set(&mut self, v: impl Into<i64>) {
        self.value = v.into() as u64;
    }

    pub fn set_uint(&mut self, v: u64) {
        self.value = v;
    }

    /// Big-endian byte view, sized to cover `width_bits`.
    pub fn bytes(&self) -> Vec<u8> {
        let nbytes = (self.width_bits as usize).div_ceil(8);
        let full = self.value.to_be_bytes();
        full[full.len() - nbytes..].to_vec()
    }
}

/// Parsed header vector: named fields organized as `header.field`. Each PHV
/// is rooted in a shared [`FieldCatalog`] that describes which fields exist
/// and their widths; the catalog is immutable for the life of a loaded
/// program, so cloning a PHV is just cloning the value map.
#[derive(Debug, Clone)]
pub struct Phv {
    catalog: Arc<FieldCatalog>,
    values: HashMap<String, Field>,
}

impl Phv {
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        let values = catalog
            .specs
            .iter()
            .map(|(name, spec)| (name.clone(), Field::new(spec.width_bits)))
            .collect();
        Self { catalog, values }
    }

    pub fn catalog(&self) -> &Arc<FieldCatalog> {
        &self.catalog
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.catalog.has_field(name)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.values.get(name)
    }

    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.values.get_mut(name)
    }

    /// Zeroes metadata fields only; header fields are left untouched.
    pub fn reset_metadata(&mut self) {
        for name in self.catalog.metadata_fields() {
            if let Some(f) = self.values.get_mut(name) {
                f.value = 0;
            }
        }
    }

    /// Copies the named fields from `src` into `self`, used by clone and
    /// resubmit/recirculate paths to propagate a program-declared field list.
    pub fn copy_fields_from(&mut self, src: &Phv, field_names: &[String]) {
        for name in field_names {
            if let Some(v) = src.values.get(name) {
                let v = *v;
                if let Some(dst) = self.values.get_mut(name) {
                    *dst = v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Arc<FieldCatalog> {
        FieldCatalog::builder()
            .with_standard_metadata()
            .with_queueing_metadata(true)
            .with_intrinsic_metadata(&["intrinsic_metadata.mcast_grp"])
            .build()
    }

    #[test]
    fn reset_metadata_zeroes_metadata_only() {
        let catalog = catalog();
        let mut phv = Phv::new(catalog);
        phv.get_field_mut("standard_metadata.egress_spec")
            .unwrap()
            .set(5i64);
        phv.reset_metadata();
        assert_eq!(
            phv.get_field("standard_metadata.egress_spec")
                .unwrap()
                .get_int(),
            0
        );
    }

    #[test]
    fn queueing_metadata_all_or_none_detection_is_external_but_has_field_works() {
        let catalog = FieldCatalog::builder().with_standard_metadata().build();
        let phv = Phv::new(catalog);
        assert!(!phv.has_field("queueing_metadata.enq_timestamp"));
        assert!(phv.has_field("standard_metadata.ingress_port"));
    }

    #[test]
    fn copy_fields_from_only_copies_named_fields() {
        let catalog = catalog();
        let mut src = Phv::new(catalog.clone());
        src.get_field_mut("standard_metadata.egress_spec")
            .unwrap()
            .set(7i64);
        src.get_field_mut("intrinsic_metadata.mcast_grp")
            .unwrap()
            .set(9i64);

        let mut dst = Phv::new(catalog);
        dst.copy_fields_from(&src, &["standard_metadata.egress_spec".to_string()]);
        assert_eq!(
            dst.get_field("standard_metadata.egress_spec")
                .unwrap()
                .get_int(),
            7
        );
        assert_eq!(
            dst.get_field("intrinsic_metadata.mcast_grp")
                .unwrap()
                .get_int(),
            0
        );
    }

    #[test]
    fn field_byte_view_is_big_endian_and_sized_to_width() {
        let mut f = Field::new(16);
        f.set(0x1234i64);
        assert_eq!(f.bytes(), vec![0x12, 0x34]);
    }
}
