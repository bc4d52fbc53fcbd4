//! Export and import of property values
//!
//! [`Serializable`] walks properties and objects against an
//! [`ExportContext`] or [`ImportContext`]. The contexts own the tree format;
//! [`TomlExporter`] and [`TomlImporter`] store primitive values in TOML
//! tables, one nested table per object. A [`TimeSpan`] is stored as integer
//! microseconds and ids as their string form.
//!
//! Only values that were explicitly set are exported. Properties flagged
//! [`PropertyFlags::NO_SERIALIZE`] are skipped in both directions.

use crate::any::TypedValue;
use crate::error::{MetaError, Result};
use crate::object::{MetaObject, PropertyFlags};
use crate::property::{Property, SetOutcome};
use crate::time_span::TimeSpan;
use crate::uid::{InstanceId, ObjectId, TypeId};

/// Sink for exported values
pub trait ExportContext {
    fn begin_object(&mut self, name: &str) -> Result<()>;
    fn export_value(&mut self, name: &str, value: &TypedValue) -> Result<()>;
    fn end_object(&mut self) -> Result<()>;
}

/// Source of imported values
pub trait ImportContext {
    /// Enter a nested object; returns false if it is absent
    fn begin_object(&mut self, name: &str) -> Result<bool>;

    /// Read `name` as a value of type `declared`; `None` if absent
    fn import_value(&mut self, name: &str, declared: TypeId) -> Result<Option<TypedValue>>;

    fn end_object(&mut self) -> Result<()>;
}

pub trait Serializable {
    fn export(&self, ctx: &mut dyn ExportContext) -> Result<()>;
    fn import(&self, ctx: &mut dyn ImportContext) -> Result<()>;
}

impl Serializable for Property {
    fn export(&self, ctx: &mut dyn ExportContext) -> Result<()> {
        if !self.is_value_set() {
            return Ok(());
        }
        ctx.export_value(self.name(), &self.get_value())
    }

    fn import(&self, ctx: &mut dyn ImportContext) -> Result<()> {
        let Some(value) = ctx.import_value(self.name(), self.type_id())? else {
            return Ok(());
        };
        match self.set_value(&value)? {
            SetOutcome::Vetoed | SetOutcome::Failed => {
                tracing::debug!("imported value for {:?} not applied", self.name());
            }
            SetOutcome::Changed | SetOutcome::Unchanged => {}
        }
        Ok(())
    }
}

impl Serializable for MetaObject {
    fn export(&self, ctx: &mut dyn ExportContext) -> Result<()> {
        ctx.begin_object(self.class().name())?;
        for (property, flags) in self.properties() {
            if !flags.contains(PropertyFlags::NO_SERIALIZE) {
                property.export(ctx)?;
            }
        }
        ctx.end_object()
    }

    fn import(&self, ctx: &mut dyn ImportContext) -> Result<()> {
        if !ctx.begin_object(self.class().name())? {
            return Ok(());
        }
        for (property, flags) in self.properties() {
            if !flags.contains(PropertyFlags::NO_SERIALIZE) {
                property.import(ctx)?;
            }
        }
        ctx.end_object()
    }
}

// ============================================================================
// TOML contexts
// ============================================================================

fn to_toml(value: &TypedValue) -> Option<toml::Value> {
    if let Some(v) = value.downcast_ref::<bool>() {
        return Some(toml::Value::Boolean(*v));
    }
    if let Some(v) = value.downcast_ref::<i32>() {
        return Some(toml::Value::Integer(i64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<i64>() {
        return Some(toml::Value::Integer(*v));
    }
    if let Some(v) = value.downcast_ref::<u32>() {
        return Some(toml::Value::Integer(i64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<u64>() {
        return i64::try_from(*v).ok().map(toml::Value::Integer);
    }
    if let Some(v) = value.downcast_ref::<f32>() {
        return Some(toml::Value::Float(f64::from(*v)));
    }
    if let Some(v) = value.downcast_ref::<f64>() {
        return Some(toml::Value::Float(*v));
    }
    if let Some(v) = value.downcast_ref::<String>() {
        return Some(toml::Value::String(v.clone()));
    }
    if let Some(v) = value.downcast_ref::<TimeSpan>() {
        return Some(toml::Value::Integer(v.as_micros()));
    }
    if let Some(v) = value.downcast_ref::<TypeId>() {
        return Some(toml::Value::String(v.to_string()));
    }
    if let Some(v) = value.downcast_ref::<ObjectId>() {
        return Some(toml::Value::String(v.to_string()));
    }
    if let Some(v) = value.downcast_ref::<InstanceId>() {
        return Some(toml::Value::String(v.to_string()));
    }
    None
}

fn from_toml(value: &toml::Value, declared: TypeId) -> Option<TypedValue> {
    match value {
        toml::Value::Boolean(v) if declared == TypeId::of::<bool>() => Some(TypedValue::new(*v)),
        toml::Value::Integer(v) if declared == TypeId::of::<i32>() => {
            i32::try_from(*v).ok().map(TypedValue::new)
        }
        toml::Value::Integer(v) if declared == TypeId::of::<i64>() => Some(TypedValue::new(*v)),
        toml::Value::Integer(v) if declared == TypeId::of::<u32>() => {
            u32::try_from(*v).ok().map(TypedValue::new)
        }
        toml::Value::Integer(v) if declared == TypeId::of::<u64>() => {
            u64::try_from(*v).ok().map(TypedValue::new)
        }
        toml::Value::Float(v) if declared == TypeId::of::<f32>() => {
            Some(TypedValue::new(*v as f32))
        }
        toml::Value::Float(v) if declared == TypeId::of::<f64>() => Some(TypedValue::new(*v)),
        toml::Value::Integer(v) if declared == TypeId::of::<f32>() => {
            Some(TypedValue::new(*v as f32))
        }
        toml::Value::Integer(v) if declared == TypeId::of::<f64>() => {
            Some(TypedValue::new(*v as f64))
        }
        toml::Value::String(v) if declared == TypeId::of::<String>() => {
            Some(TypedValue::new(v.clone()))
        }
        toml::Value::Integer(v) if declared == TypeId::of::<TimeSpan>() => {
            Some(TypedValue::new(TimeSpan::from_micros(*v)))
        }
        toml::Value::String(v) if declared == TypeId::of::<TypeId>() => {
            v.parse::<TypeId>().ok().map(TypedValue::new)
        }
        toml::Value::String(v) if declared == TypeId::of::<ObjectId>() => {
            v.parse::<ObjectId>().ok().map(TypedValue::new)
        }
        toml::Value::String(v) if declared == TypeId::of::<InstanceId>() => {
            v.parse::<InstanceId>().ok().map(TypedValue::new)
        }
        _ => None,
    }
}

/// Exports into a TOML table
#[derive(Debug, Default)]
pub struct TomlExporter {
    root: toml::Table,
    open: Vec<(String, toml::Table)>,
}

impl TomlExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> &mut toml::Table {
        match self.open.last_mut() {
            Some((_, table)) => table,
            None => &mut self.root,
        }
    }

    /// The exported tree; unclosed objects are closed
    pub fn finish(mut self) -> toml::Table {
        while !self.open.is_empty() {
            let _ = self.end_object();
        }
        self.root
    }

    pub fn to_toml_string(self) -> Result<String> {
        toml::to_string_pretty(&self.finish()).map_err(|err| MetaError::Serialization(err.to_string()))
    }
}

impl ExportContext for TomlExporter {
    fn begin_object(&mut self, name: &str) -> Result<()> {
        self.open.push((name.to_string(), toml::Table::new()));
        Ok(())
    }

    fn export_value(&mut self, name: &str, value: &TypedValue) -> Result<()> {
        let converted = to_toml(value).ok_or_else(|| {
            MetaError::Serialization(format!("{} has unsupported type {}", name, value.type_name()))
        })?;
        self.current().insert(name.to_string(), converted);
        Ok(())
    }

    fn end_object(&mut self) -> Result<()> {
        let (name, table) = self
            .open
            .pop()
            .ok_or_else(|| MetaError::Serialization("end_object without begin_object".into()))?;
        self.current().insert(name, toml::Value::Table(table));
        Ok(())
    }
}

/// Imports from a TOML table
#[derive(Debug)]
pub struct TomlImporter {
    tables: Vec<toml::Table>,
}

impl TomlImporter {
    pub fn new(root: toml::Table) -> Self {
        Self { tables: vec![root] }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: toml::Table =
            toml::from_str(content).map_err(|err| MetaError::Serialization(err.to_string()))?;
        Ok(Self::new(root))
    }

    fn current(&self) -> Option<&toml::Table> {
        self.tables.last()
    }
}

impl ImportContext for TomlImporter {
    fn begin_object(&mut self, name: &str) -> Result<bool> {
        let nested = match self.current().and_then(|table| table.get(name)) {
            Some(toml::Value::Table(table)) => table.clone(),
            Some(_) => {
                return Err(MetaError::Serialization(format!("{} is not a table", name)));
            }
            None => return Ok(false),
        };
        self.tables.push(nested);
        Ok(true)
    }

    fn import_value(&mut self, name: &str, declared: TypeId) -> Result<Option<TypedValue>> {
        let Some(value) = self.current().and_then(|table| table.get(name)) else {
            return Ok(None);
        };
        from_toml(value, declared)
            .map(Some)
            .ok_or_else(|| MetaError::Serialization(format!("{} has an unexpected type", name)))
    }

    fn end_object(&mut self) -> Result<()> {
        // The root table stays
        if self.tables.len() > 1 {
            self.tables.pop();
            Ok(())
        } else {
            Err(MetaError::Serialization("end_object without begin_object".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ClassInfo;
    use std::sync::Arc;

    fn light() -> Arc<MetaObject> {
        MetaObject::new(Arc::new(
            ClassInfo::builder("Light")
                .property("Intensity", 1.0f32)
                .property("Name", String::from("key"))
                .property("Samples", 4u32)
                .property_with_flags("Cache", 0i64, PropertyFlags::NO_SERIALIZE)
                .build(),
        ))
    }

    #[test]
    fn test_export_only_set_values() {
        let object = light();
        object.set_value("Intensity", &TypedValue::new(2.5f32)).unwrap();
        object.set_value("Cache", &TypedValue::new(99i64)).unwrap();

        let mut exporter = TomlExporter::new();
        object.export(&mut exporter).unwrap();
        let tree = exporter.finish();

        let table = tree["Light"].as_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table["Intensity"].as_float(), Some(2.5));
    }

    #[test]
    fn test_import_into_object() {
        let mut importer = TomlImporter::from_toml_str(
            r#"
            [Light]
            Intensity = 3
            Name = "fill"
            Cache = 12
            "#,
        )
        .unwrap();

        let object = light();
        object.import(&mut importer).unwrap();
        assert_eq!(object.get_value("Intensity").unwrap().get::<f32>(), Some(3.0));
        assert_eq!(
            object.get_value("Name").unwrap().get::<String>().as_deref(),
            Some("fill")
        );
        assert_eq!(object.get_value("Samples").unwrap().get::<u32>(), Some(4));
        assert_eq!(object.get_value("Cache").unwrap().get::<i64>(), Some(0));
    }

    #[test]
    fn test_import_type_mismatch() {
        let mut importer = TomlImporter::from_toml_str("[Light]\nSamples = \"many\"").unwrap();
        let err = light().import(&mut importer).unwrap_err();
        assert!(matches!(err, MetaError::Serialization(_)));
    }

    #[test]
    fn test_missing_object_is_skipped() {
        let mut importer = TomlImporter::from_toml_str("[Other]\nx = 1").unwrap();
        let object = light();
        object.import(&mut importer).unwrap();
        assert!(!object.property("Intensity").unwrap().is_value_set());
    }

    #[test]
    fn test_unsupported_export_type() {
        #[derive(Clone, Debug, PartialEq)]
        struct Opaque;

        let property = Property::with_value("Blob", Opaque);
        property.set(Opaque).unwrap();
        let mut exporter = TomlExporter::new();
        assert!(matches!(
            property.export(&mut exporter),
            Err(MetaError::Serialization(_))
        ));
    }

    #[test]
    fn test_round_trip_text() {
        let source = light();
        source.set_value("Samples", &TypedValue::new(16u32)).unwrap();
        let mut exporter = TomlExporter::new();
        source.export(&mut exporter).unwrap();
        let text = exporter.to_toml_string().unwrap();

        let target = light();
        target
            .import(&mut TomlImporter::from_toml_str(&text).unwrap())
            .unwrap();
        assert_eq!(target.get_value("Samples").unwrap().get::<u32>(), Some(16));
    }

    #[test]
    fn test_round_trip_time_span_and_ids() {
        let class = || {
            Arc::new(
                ClassInfo::builder("Clip")
                    .property("Length", TimeSpan::ZERO)
                    .property("Forever", TimeSpan::ZERO)
                    .property("Kind", TypeId::INVALID)
                    .property("Source", ObjectId::INVALID)
                    .property("Owner", InstanceId::INVALID)
                    .build(),
            )
        };
        let owner = InstanceId::generate();
        let source = MetaObject::new(class());
        source.set_value("Length", &TypedValue::new(TimeSpan::from_millis(1500))).unwrap();
        source.set_value("Forever", &TypedValue::new(TimeSpan::INFINITE)).unwrap();
        source.set_value("Kind", &TypedValue::new(TypeId::of::<f32>())).unwrap();
        source.set_value("Source", &TypedValue::new(ObjectId::from_name("test.Clip"))).unwrap();
        source.set_value("Owner", &TypedValue::new(owner)).unwrap();

        let mut exporter = TomlExporter::new();
        source.export(&mut exporter).unwrap();
        let text = exporter.to_toml_string().unwrap();

        let target = MetaObject::new(class());
        target
            .import(&mut TomlImporter::from_toml_str(&text).unwrap())
            .unwrap();
        let get = |name: &str| target.get_value(name).unwrap();
        assert_eq!(get("Length").get::<TimeSpan>(), Some(TimeSpan::from_millis(1500)));
        assert_eq!(get("Forever").get::<TimeSpan>(), Some(TimeSpan::INFINITE));
        assert_eq!(get("Kind").get::<TypeId>(), Some(TypeId::of::<f32>()));
        assert_eq!(get("Source").get::<ObjectId>(), Some(ObjectId::from_name("test.Clip")));
        assert_eq!(get("Owner").get::<InstanceId>(), Some(owner));
    }

    #[test]
    fn test_import_malformed_id_is_error() {
        let class = ClassInfo::builder("Clip").property("Source", ObjectId::INVALID).build();
        let object = MetaObject::new(Arc::new(class));
        let mut importer = TomlImporter::from_toml_str("[Clip]\nSource = \"not-an-id\"").unwrap();
        assert!(matches!(
            object.import(&mut importer),
            Err(MetaError::Serialization(_))
        ));
    }
}
