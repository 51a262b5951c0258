//! Entity definitions: table naming, cache keys and write hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use harbor_core::{ConfigSource, HarborResult, RecordId, Row};
use serde_json::Value;

/// Field holding structured sub-data, stored JSON-encoded in the row.
pub const EXTEND_FIELD: &str = "extend";

/// Result of a field hook.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    /// Write this (possibly transformed) value.
    Keep(Value),
    /// Drop the field from the write.
    Omit,
}

/// Transform applied to one field before a write. Receives the field value
/// and the whole incoming row.
pub type FieldHook = Arc<dyn Fn(Value, &Row) -> FieldOutcome + Send + Sync>;

/// Hook run around inserts; may adjust the row.
pub type InsertHook = Arc<dyn Fn(&mut Row) -> HarborResult<()> + Send + Sync>;

/// Default `extend` hook: mappings and lists are stored as JSON text.
pub fn encode_structured(value: Value, _row: &Row) -> FieldOutcome {
    match value {
        Value::Object(_) | Value::Array(_) => FieldOutcome::Keep(Value::String(value.to_string())),
        other => FieldOutcome::Keep(other),
    }
}

/// `UserProfile` -> `user_profile`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out.trim_matches('_').to_string()
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A persisted entity type.
///
/// Built once at startup and shared; hooks are registered here rather than
/// discovered by name at write time.
#[derive(Clone)]
pub struct EntityDef {
    name: String,
    table: String,
    pk: String,
    database: String,
    db_source: ConfigSource,
    cache_source: ConfigSource,
    field_hooks: BTreeMap<String, FieldHook>,
    before_insert: Option<InsertHook>,
    after_insert: Option<InsertHook>,
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("pk", &self.pk)
            .field("database", &self.database)
            .field("db_source", &self.db_source)
            .field("cache_source", &self.cache_source)
            .field("field_hooks", &self.field_hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EntityDef {
    /// Define an entity named in CamelCase. The table is the snake_case name
    /// behind `table_prefix`; `database` names the schema the rows live in.
    pub fn new(name: impl Into<String>, table_prefix: &str, database: impl Into<String>) -> Self {
        let name = name.into();
        let table = format!("{table_prefix}{}", snake_case(&name));
        let mut field_hooks: BTreeMap<String, FieldHook> = BTreeMap::new();
        field_hooks.insert(EXTEND_FIELD.to_string(), Arc::new(encode_structured));
        Self {
            name,
            table,
            pk: "id".to_string(),
            database: database.into(),
            db_source: ConfigSource::Named("db".to_string()),
            cache_source: ConfigSource::Named("redis".to_string()),
            field_hooks,
            before_insert: None,
            after_insert: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_pk(mut self, pk: impl Into<String>) -> Self {
        self.pk = pk.into();
        self
    }

    pub fn with_db_source(mut self, source: ConfigSource) -> Self {
        self.db_source = source;
        self
    }

    pub fn with_cache_source(mut self, source: ConfigSource) -> Self {
        self.cache_source = source;
        self
    }

    /// Register (or replace) the hook for `field`.
    pub fn with_field_hook<F>(mut self, field: impl Into<String>, hook: F) -> Self
    where
        F: Fn(Value, &Row) -> FieldOutcome + Send + Sync + 'static,
    {
        self.field_hooks.insert(field.into(), Arc::new(hook));
        self
    }

    pub fn with_before_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Row) -> HarborResult<()> + Send + Sync + 'static,
    {
        self.before_insert = Some(Arc::new(hook));
        self
    }

    pub fn with_after_insert<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Row) -> HarborResult<()> + Send + Sync + 'static,
    {
        self.after_insert = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pk(&self) -> &str {
        &self.pk
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn db_source(&self) -> &ConfigSource {
        &self.db_source
    }

    pub fn cache_source(&self) -> &ConfigSource {
        &self.cache_source
    }

    /// Default cache key prefix, `"{database}.{Table}-"`.
    pub fn cache_prefix(&self) -> String {
        format!("{}.{}-", self.database, upper_first(&self.table))
    }

    /// Cache key for `id`, under `prefix` when given.
    pub fn cache_key(&self, id: &RecordId, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) => format!("{prefix}{id}"),
            None => format!("{}{id}", self.cache_prefix()),
        }
    }

    /// Run the registered field hooks over `data`.
    pub fn apply_field_hooks(&self, data: Row) -> Row {
        let snapshot = data.clone();
        let mut out = Row::new();
        for (field, value) in data {
            match self.field_hooks.get(&field) {
                Some(hook) => match hook(value, &snapshot) {
                    FieldOutcome::Keep(value) => {
                        out.insert(field, value);
                    }
                    FieldOutcome::Omit => {}
                },
                None => {
                    out.insert(field, value);
                }
            }
        }
        out
    }

    pub(crate) fn run_before_insert(&self, row: &mut Row) -> HarborResult<()> {
        match &self.before_insert {
            Some(hook) => hook(row),
            None => Ok(()),
        }
    }

    pub(crate) fn run_after_insert(&self, row: &mut Row) -> HarborResult<()> {
        match &self.after_insert {
            Some(hook) => hook(row),
            None => Ok(()),
        }
    }

    /// Decode a string-encoded `extend` field back into structured data.
    pub fn decode_extend(&self, row: &mut Row) {
        let decoded = match row.get(EXTEND_FIELD) {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
            _ => None,
        };
        if let Some(value @ (Value::Object(_) | Value::Array(_))) = decoded {
            row.insert(EXTEND_FIELD.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_table_and_key_naming() {
        let entity = EntityDef::new("UserProfile", "", "harbor");
        assert_eq!(entity.table(), "user_profile");
        assert_eq!(entity.pk(), "id");
        assert_eq!(entity.cache_prefix(), "harbor.User_profile-");
        assert_eq!(entity.cache_key(&RecordId::Int(5), None), "harbor.User_profile-5");
        assert_eq!(
            entity.cache_key(&RecordId::from("ab"), Some("custom:")),
            "custom:ab"
        );

        let prefixed = EntityDef::new("Game", "t_", "app");
        assert_eq!(prefixed.table(), "t_game");
        assert_eq!(prefixed.cache_key(&RecordId::Int(66), None), "app.T_game-66");

        let overridden = EntityDef::new("Game", "t_", "app").with_table("games");
        assert_eq!(overridden.cache_prefix(), "app.Games-");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("OrderItemLog"), "order_item_log");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_default_sources() {
        let entity = EntityDef::new("User", "", "harbor");
        assert_eq!(entity.db_source(), &ConfigSource::from("db"));
        assert_eq!(entity.cache_source(), &ConfigSource::from("redis"));
    }

    #[test]
    fn test_extend_hook_encodes_structures() {
        let entity = EntityDef::new("User", "", "harbor");
        let out = entity.apply_field_hooks(row(json!({
            "name": "ann",
            "extend": {"level": 3}
        })));
        assert_eq!(out["name"], json!("ann"));
        assert_eq!(out["extend"], json!(r#"{"level":3}"#));

        let untouched = entity.apply_field_hooks(row(json!({"extend": "raw"})));
        assert_eq!(untouched["extend"], json!("raw"));
    }

    #[test]
    fn test_hooks_can_omit_and_see_whole_row() {
        let entity = EntityDef::new("User", "", "harbor")
            .with_field_hook("password", |_, _| FieldOutcome::Omit)
            .with_field_hook("display", |value, row| {
                let suffix = row.get("name").and_then(Value::as_str).unwrap_or("");
                FieldOutcome::Keep(json!(format!("{}-{suffix}", value.as_str().unwrap_or(""))))
            });
        let out = entity.apply_field_hooks(row(json!({
            "name": "ann",
            "display": "hi",
            "password": "secret"
        })));
        assert!(!out.contains_key("password"));
        assert_eq!(out["display"], json!("hi-ann"));
    }

    #[test]
    fn test_decode_extend() {
        let entity = EntityDef::new("User", "", "harbor");
        let mut hit = row(json!({"id": 1, "extend": r#"{"a":1}"#}));
        entity.decode_extend(&mut hit);
        assert_eq!(hit["extend"], json!({"a": 1}));

        let mut plain = row(json!({"extend": "not json"}));
        entity.decode_extend(&mut plain);
        assert_eq!(plain["extend"], json!("not json"));
    }
}
