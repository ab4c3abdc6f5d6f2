//! Entity registry: the schema every request is resolved against.
//!
//! A [`Registry`] is assembled once through [`RegistryBuilder`], validated as
//! a whole, and then shared read-only (usually as `Arc<Registry>`) by every
//! session and query builder.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, TypeError};
use crate::field::{FieldInfo, IdentityStrategy};
use crate::identifiers::is_identifier;
use crate::relationship::{AssociationInfo, Cardinality};
use crate::types::FieldType;
use crate::value::Value;
use crate::Result;

/// Structural description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityShape {
    pub name: String,
    /// Name of the identity field; must also appear in `fields`.
    pub identity: String,
    #[serde(default)]
    pub strategy: IdentityStrategy,
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub associations: Vec<AssociationInfo>,
}

impl EntityShape {
    /// Start a shape with its identity field.
    pub fn new(name: impl Into<String>, identity: impl Into<String>, id_type: FieldType) -> Self {
        let identity = identity.into();
        Self {
            name: name.into(),
            fields: vec![FieldInfo::new(identity.clone(), id_type)],
            identity,
            strategy: IdentityStrategy::Sequence,
            associations: Vec::new(),
        }
    }

    pub fn strategy(mut self, strategy: IdentityStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn association(mut self, association: AssociationInfo) -> Self {
        self.associations.push(association);
        self
    }

    /// Look up a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up an association by name.
    pub fn get_association(&self, name: &str) -> Option<&AssociationInfo> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Look up a field, failing with `UnknownField`.
    pub fn require_field(&self, name: &str) -> Result<&FieldInfo> {
        self.get_field(name)
            .ok_or_else(|| Error::unknown_field(&self.name, name))
    }

    /// Look up an association, failing with `UnknownField`.
    pub fn require_association(&self, name: &str) -> Result<&AssociationInfo> {
        self.get_association(name)
            .ok_or_else(|| Error::unknown_field(&self.name, name))
    }

    pub fn identity_field(&self) -> Option<&FieldInfo> {
        self.get_field(&self.identity)
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Associations fetched eagerly on every read.
    pub fn eager_associations(&self) -> impl Iterator<Item = &AssociationInfo> {
        self.associations.iter().filter(|a| a.is_eager())
    }

    /// Validate a value for `field` and coerce it to the field's type.
    pub fn check_value(&self, field: &str, value: Value) -> Result<Value> {
        let info = self.require_field(field)?;
        if value.is_null() {
            if info.nullable || field == self.identity {
                return Ok(Value::Null);
            }
            return Err(Error::Type(TypeError {
                expected: info.field_type.sql_name(),
                actual: "NULL in non-nullable field".to_string(),
                column: Some(field.to_string()),
            }));
        }
        if !info.field_type.accepts(&value) {
            return Err(Error::Type(TypeError {
                expected: info.field_type.sql_name(),
                actual: value.type_name().to_string(),
                column: Some(field.to_string()),
            }));
        }
        Ok(info.field_type.coerce(value))
    }
}

/// Immutable collection of entity shapes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registry {
    entities: BTreeMap<String, EntityShape>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Describe an entity type.
    pub fn describe(&self, entity: &str) -> Result<&EntityShape> {
        self.entities
            .get(entity)
            .ok_or_else(|| Error::UnknownEntityType(entity.to_string()))
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Registered entity type names, sorted.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Parse and validate a registry from its JSON form:
    /// `{"entities": [EntityShape, ...]}`.
    pub fn from_json(json: &str) -> Result<Registry> {
        let doc: RegistryDocument = serde_json::from_str(json)?;
        doc.entities
            .into_iter()
            .fold(Registry::builder(), RegistryBuilder::entity)
            .build()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    entities: Vec<EntityShape>,
}

/// Collects entity shapes and validates them together.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityShape>,
}

impl RegistryBuilder {
    pub fn entity(mut self, shape: EntityShape) -> Self {
        self.entities.push(shape);
        self
    }

    /// Validate every shape and freeze the registry.
    ///
    /// Checks identifier syntax, duplicate names, that the identity field
    /// exists, that association targets are registered, and that each
    /// foreign-key field lives on the side its cardinality requires.
    pub fn build(self) -> Result<Registry> {
        let mut entities = BTreeMap::new();
        for shape in self.entities {
            if !is_identifier(&shape.name) {
                return Err(config(format!("invalid entity name '{}'", shape.name)));
            }
            if entities.contains_key(&shape.name) {
                return Err(config(format!("entity '{}' registered twice", shape.name)));
            }
            entities.insert(shape.name.clone(), shape);
        }

        for shape in entities.values() {
            validate_shape(shape, &entities)?;
        }

        tracing::debug!(entities = entities.len(), "Registry built");
        Ok(Registry { entities })
    }
}

fn validate_shape(shape: &EntityShape, entities: &BTreeMap<String, EntityShape>) -> Result<()> {
    let mut names = HashSet::new();
    for field in &shape.fields {
        if !is_identifier(&field.name) {
            return Err(config(format!(
                "invalid field name '{}.{}'",
                shape.name, field.name
            )));
        }
        if !names.insert(field.name.as_str()) {
            return Err(config(format!(
                "duplicate field '{}.{}'",
                shape.name, field.name
            )));
        }
    }

    match shape.identity_field() {
        None => {
            return Err(config(format!(
                "identity field '{}' is not a field of '{}'",
                shape.identity, shape.name
            )));
        }
        Some(id) if id.field_type == FieldType::Double || id.field_type == FieldType::Json => {
            return Err(config(format!(
                "identity field '{}.{}' cannot be {}",
                shape.name,
                id.name,
                id.field_type.sql_name()
            )));
        }
        Some(_) => {}
    }

    for assoc in &shape.associations {
        if !is_identifier(&assoc.name) {
            return Err(config(format!(
                "invalid association name '{}.{}'",
                shape.name, assoc.name
            )));
        }
        if !names.insert(assoc.name.as_str()) {
            return Err(config(format!(
                "association '{}.{}' collides with another member",
                shape.name, assoc.name
            )));
        }
        let target = entities.get(&assoc.target).ok_or_else(|| {
            config(format!(
                "association '{}.{}' targets unregistered entity '{}'",
                shape.name, assoc.name, assoc.target
            ))
        })?;
        let fk_side = match assoc.cardinality {
            Cardinality::One => shape,
            Cardinality::Many => target,
        };
        if fk_side.get_field(&assoc.foreign_key).is_none() {
            return Err(config(format!(
                "foreign key '{}' of association '{}.{}' is not a field of '{}'",
                assoc.foreign_key, shape.name, assoc.name, fk_side.name
            )));
        }
    }
    Ok(())
}

fn config(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::relationship::FetchMode;

    fn team() -> EntityShape {
        EntityShape::new("Team", "id", FieldType::BigInt)
            .field(FieldInfo::new("name", FieldType::Text))
            .association(AssociationInfo::many("members", "Member", "team_id"))
    }

    fn member() -> EntityShape {
        EntityShape::new("Member", "id", FieldType::BigInt)
            .field(FieldInfo::new("username", FieldType::Text))
            .field(FieldInfo::new("age", FieldType::Integer))
            .field(FieldInfo::new("team_id", FieldType::BigInt).nullable(true))
            .association(AssociationInfo::one("team", "Team", "team_id"))
    }

    #[test]
    fn describe_registered_entities() {
        let registry = Registry::builder().entity(team()).entity(member()).build().unwrap();
        let shape = registry.describe("Member").unwrap();
        assert_eq!(shape.identity, "id");
        assert_eq!(
            shape.field_names().collect::<Vec<_>>(),
            vec!["id", "username", "age", "team_id"]
        );
        assert_eq!(
            shape.get_association("team").unwrap().fetch,
            FetchMode::Lazy
        );
        assert_eq!(registry.entity_types().collect::<Vec<_>>(), vec!["Member", "Team"]);
    }

    #[test]
    fn unknown_entity_type() {
        let registry = Registry::builder().entity(team()).entity(member()).build().unwrap();
        let err = registry.describe("Order").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownEntityType);
    }

    #[test]
    fn rejects_unregistered_target() {
        let err = Registry::builder().entity(member()).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("unregistered entity 'Team'"));
    }

    #[test]
    fn rejects_foreign_key_on_wrong_side() {
        let bad_team = EntityShape::new("Team", "id", FieldType::BigInt)
            .association(AssociationInfo::many("members", "Member", "member_team"));
        let err = Registry::builder()
            .entity(bad_team)
            .entity(member())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not a field of 'Member'"));
    }

    #[test]
    fn rejects_bad_identifiers_and_missing_identity() {
        let err = Registry::builder()
            .entity(EntityShape::new("Bad Name", "id", FieldType::BigInt))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid entity name"));

        let mut shape = EntityShape::new("Thing", "id", FieldType::BigInt);
        shape.identity = "uuid".to_string();
        let err = Registry::builder().entity(shape).build().unwrap_err();
        assert!(err.to_string().contains("identity field 'uuid'"));
    }

    #[test]
    fn check_value_enforces_type_and_nullability() {
        let shape = member();
        assert_eq!(shape.check_value("age", Value::BigInt(10)).unwrap(), Value::Int(10));
        assert_eq!(shape.check_value("team_id", Value::Null).unwrap(), Value::Null);
        assert_eq!(
            shape.check_value("age", Value::Null).unwrap_err().kind(),
            ErrorKind::Type
        );
        assert_eq!(
            shape
                .check_value("age", Value::Text("ten".into()))
                .unwrap_err()
                .kind(),
            ErrorKind::Type
        );
        assert_eq!(
            shape.check_value("nickname", Value::Null).unwrap_err().kind(),
            ErrorKind::UnknownField
        );
    }

    #[test]
    fn from_json() {
        let json = r#"{
            "entities": [
                {"name": "Team", "identity": "id",
                 "fields": [{"name": "id", "type": "big_int"}, {"name": "name", "type": "text"}]},
                {"name": "Member", "identity": "id",
                 "fields": [
                    {"name": "id", "type": "big_int"},
                    {"name": "username", "type": "text"},
                    {"name": "team_id", "type": "big_int", "nullable": true}
                 ],
                 "associations": [
                    {"name": "team", "target": "Team", "cardinality": "one",
                     "fetch": "eager", "foreign_key": "team_id"}
                 ]}
            ]
        }"#;
        let registry = Registry::from_json(json).unwrap();
        let member = registry.describe("Member").unwrap();
        assert!(member.get_association("team").unwrap().is_eager());
        assert_eq!(member.strategy, IdentityStrategy::Sequence);
    }
}
