//! Entity Registry
//!
//! The static catalog mapping an entity name to its REST contract: endpoint,
//! business-center group, display name, field specs and related tables.
//! Pure lookup, no I/O. An unknown entity name is a terminal condition for
//! the workflow; the caller reports the supported-entity list instead of
//! guessing an endpoint.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::workflow::Operation;

/// Attribute kind used for validation and "please supply this field" prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    Textarea,
}

/// Describes one entity attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FieldSpec {
    fn required(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: true,
            enum_values: Vec::new(),
            placeholder: None,
        }
    }

    fn auto(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            enum_values: Vec::new(),
            placeholder: None,
        }
    }

    fn with_placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// A table whose rows reference records of an entity. Used by the
/// ImpactInspector to estimate the blast radius of updates and deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedTable {
    pub table: String,
    /// Query parameter the downstream API filters on.
    pub foreign_key: String,
    pub description: String,
}

impl RelatedTable {
    fn new(table: &str, foreign_key: &str, description: &str) -> Self {
        Self {
            table: table.to_string(),
            foreign_key: foreign_key.to_string(),
            description: description.to_string(),
        }
    }
}

/// Immutable API contract for one entity. Loaded once per process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    pub display_name: String,
    pub endpoint: String,
    /// Business-center label the endpoint belongs to.
    pub group: String,
    pub required_fields: Vec<FieldSpec>,
    pub auto_fill_fields: Vec<FieldSpec>,
    pub optional_fields: Vec<String>,
    pub related_tables: Vec<RelatedTable>,
}

impl EntitySpec {
    /// Endpoint for a given operation; update/delete address a record.
    pub fn endpoint_for(&self, operation: Operation, record_id: Option<&str>) -> String {
        match operation {
            Operation::Create => self.endpoint.clone(),
            Operation::Update | Operation::Delete => {
                format!("{}/{}", self.endpoint, record_id.unwrap_or("{id}"))
            }
        }
    }

    pub fn http_method_for(&self, operation: Operation) -> &'static str {
        match operation {
            Operation::Create => "POST",
            Operation::Update => "PUT",
            Operation::Delete => "DELETE",
        }
    }

    pub fn required_field_names(&self) -> Vec<String> {
        self.required_fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Required fields the payload leaves absent, null or blank.
    pub fn missing_required(
        &self,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<FieldSpec> {
        self.required_fields
            .iter()
            .filter(|f| match payload.get(&f.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .cloned()
            .collect()
    }
}

/// Catalog of every entity the mutation workflow can touch.
pub struct EntityRegistry {
    entities: HashMap<String, EntitySpec>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entities: HashMap::new(),
            order: Vec::new(),
        };
        for spec in catalog() {
            registry.order.push(spec.name.clone());
            registry.entities.insert(spec.name.clone(), spec);
        }
        registry
    }

    pub fn resolve(&self, entity_name: &str) -> Option<&EntitySpec> {
        self.entities.get(entity_name)
    }

    /// Supported entity names, in catalog order.
    pub fn supported(&self) -> Vec<String> {
        self.order.clone()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn catalog() -> Vec<EntitySpec> {
    use FieldType::*;

    vec![
        EntitySpec {
            name: "students".to_string(),
            display_name: "学生".to_string(),
            endpoint: "/api/students".to_string(),
            group: "student-center".to_string(),
            required_fields: vec![
                FieldSpec::required("name", "姓名", Text).with_placeholder("学生姓名"),
                FieldSpec::required("kindergarten_id", "幼儿园", Number),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["age", "gender", "birth_date", "class_id", "student_no", "status", "remark"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: vec![
                RelatedTable::new("activity_registrations", "student_id", "activity sign-ups"),
                RelatedTable::new("performance_reports", "student_id", "performance reports"),
            ],
        },
        EntitySpec {
            name: "teachers".to_string(),
            display_name: "教师".to_string(),
            endpoint: "/api/teachers".to_string(),
            group: "teaching-center".to_string(),
            required_fields: vec![
                FieldSpec::required("name", "姓名", Text).with_placeholder("教师姓名"),
                FieldSpec::required("kindergarten_id", "幼儿园", Number),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["subject", "teacher_no", "experience", "phone", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: vec![
                RelatedTable::new("classes", "teacher_id", "classes led"),
                RelatedTable::new("activities", "organizer_id", "organized activities"),
            ],
        },
        EntitySpec {
            name: "activities".to_string(),
            display_name: "活动".to_string(),
            endpoint: "/api/activities".to_string(),
            group: "activity-center".to_string(),
            required_fields: vec![
                FieldSpec::required("title", "活动标题", Text).with_placeholder("活动标题"),
                FieldSpec::required("start_time", "开始时间", Date),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["description", "end_time", "location", "capacity", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: vec![RelatedTable::new(
                "activity_registrations",
                "activity_id",
                "activity sign-ups",
            )],
        },
        EntitySpec {
            name: "classes".to_string(),
            display_name: "班级".to_string(),
            endpoint: "/api/classes".to_string(),
            group: "teaching-center".to_string(),
            required_fields: vec![
                FieldSpec::required("name", "班级名称", Text).with_placeholder("班级名称"),
                FieldSpec::required("kindergarten_id", "幼儿园", Number),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["grade", "capacity", "teacher_id", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: vec![RelatedTable::new("students", "class_id", "enrolled students")],
        },
        EntitySpec {
            name: "parents".to_string(),
            display_name: "家长".to_string(),
            endpoint: "/api/parents".to_string(),
            group: "student-center".to_string(),
            required_fields: vec![
                FieldSpec::required("name", "姓名", Text).with_placeholder("家长姓名"),
                FieldSpec::required("phone", "联系电话", Text).with_placeholder("手机号码"),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["student_id", "relation", "email"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: vec![RelatedTable::new("students", "parent_id", "linked students")],
        },
        EntitySpec {
            name: "users".to_string(),
            display_name: "用户".to_string(),
            endpoint: "/api/users".to_string(),
            group: "system-center".to_string(),
            required_fields: vec![
                FieldSpec::required("username", "用户名", Text).with_placeholder("登录用户名"),
                FieldSpec::required("role", "角色", Select).with_enum(&["admin", "teacher", "parent"]),
            ],
            auto_fill_fields: vec![FieldSpec::auto("created_by", "创建人", Number)],
            optional_fields: ["email", "phone", "status"].iter().map(|s| s.to_string()).collect(),
            related_tables: vec![RelatedTable::new("todos", "assignee_id", "assigned todos")],
        },
        EntitySpec {
            name: "enrollments".to_string(),
            display_name: "招生申请".to_string(),
            // The enrollment API predates the naming convention.
            endpoint: "/api/enrollment-applications".to_string(),
            group: "enrollment-center".to_string(),
            required_fields: vec![
                FieldSpec::required("student_name", "幼儿姓名", Text).with_placeholder("幼儿姓名"),
                FieldSpec::required("parent_phone", "家长电话", Text).with_placeholder("家长手机号"),
            ],
            auto_fill_fields: vec![
                FieldSpec::auto("kindergarten_id", "幼儿园", Number),
                FieldSpec::auto("created_by", "创建人", Number),
            ],
            optional_fields: ["age", "intended_class", "source", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: Vec::new(),
        },
        EntitySpec {
            name: "todos".to_string(),
            display_name: "待办事项".to_string(),
            endpoint: "/api/todos".to_string(),
            group: "system-center".to_string(),
            required_fields: vec![
                FieldSpec::required("title", "标题", Text).with_placeholder("待办标题"),
            ],
            auto_fill_fields: vec![FieldSpec::auto("created_by", "创建人", Number)],
            optional_fields: ["content", "due_date", "assignee_id", "priority", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            related_tables: Vec::new(),
        },
    ]
}
