//! Template classes: immutable per-type object descriptors.
//!
//! Every heap instance carries only a type tag; the shape behind the tag
//! lives here. A template records the ordered variable-slot names (the
//! instance memory layout) and the method dispatch table (name to constant
//! pool index). Templates are built once at VM initialization from the
//! `Class` values in the pool and never change, and they live outside the
//! GC heap so the collector can reject them with a range check.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    bytecode::{Program, Value},
    error::RuntimeError,
};

/// Type tag of the global prototype object.
pub const GLOBAL_TYPE: i64 = 0;
/// Type tag of arrays.
pub const ARRAY_TYPE: i64 = 3;
/// Type tag of the first user-defined object class; later classes count up.
pub const OBJECT_TYPE: i64 = 4;
/// Header sentinel written over a moved object during collection; the next
/// word holds the forwarding address.
pub const BROKEN_HEART: i64 = -1;

/// One object type's descriptor.
#[derive(Debug)]
pub struct TemplateClass {
    /// Runtime type tag carried in instance headers.
    pub type_tag: i64,
    /// Pool index of the `Class` value this template came from; `None` for
    /// the synthetic global template.
    pub pool_index: Option<u16>,
    /// Variable slots in declaration order: name to pool index of the
    /// `Slot` value. The map position *is* the slot's offset in instances.
    pub var_slots: IndexMap<String, u16>,
    /// Method dispatch table: name to pool index of the `Method` value.
    pub methods: AHashMap<String, u16>,
}

impl TemplateClass {
    fn new(type_tag: i64, pool_index: Option<u16>) -> Self {
        Self {
            type_tag,
            pool_index,
            var_slots: IndexMap::new(),
            methods: AHashMap::new(),
        }
    }

    /// Number of variable slots an instance of this type carries.
    #[must_use]
    pub fn nvars(&self) -> usize {
        self.var_slots.len()
    }

    /// Layout offset of a named variable slot.
    #[must_use]
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.var_slots.get_index_of(name)
    }

    /// Splits a slot list from the pool into this template's var-slot
    /// layout and method table.
    fn add_slots(&mut self, program: &Program, slots: &[u16]) -> Result<(), RuntimeError> {
        for &slot_idx in slots {
            match program.values.get(slot_idx as usize) {
                Some(Value::Slot { name }) => {
                    let name = program.str_at(*name)?.to_owned();
                    self.var_slots.insert(name, slot_idx);
                }
                Some(Value::Method(method)) => {
                    let name = program.str_at(method.name)?.to_owned();
                    self.methods.insert(name, slot_idx);
                }
                _ => {
                    return Err(RuntimeError::BadPoolEntry {
                        index: slot_idx,
                        expected: "slot or method",
                    });
                }
            }
        }
        Ok(())
    }
}

/// All templates of a running program, indexed by type tag.
#[derive(Debug)]
pub struct ClassTable {
    templates: Vec<TemplateClass>,
}

impl ClassTable {
    /// Builds the table: the synthetic global template first, then one
    /// template per `Class` value in pool scan order.
    pub fn build(program: &Program) -> Result<Self, RuntimeError> {
        let mut global = TemplateClass::new(GLOBAL_TYPE, None);
        global.add_slots(program, &program.globals)?;
        let mut templates = vec![global];

        for (pool_index, value) in program.values.iter().enumerate() {
            if let Value::Class { slots } = value {
                let type_tag = OBJECT_TYPE + i64::try_from(templates.len()).unwrap_or(i64::MAX) - 1;
                let pool_index = u16::try_from(pool_index).map_err(|_| RuntimeError::BadPoolEntry {
                    index: u16::MAX,
                    expected: "class",
                })?;
                let mut template = TemplateClass::new(type_tag, Some(pool_index));
                template.add_slots(program, slots)?;
                templates.push(template);
            }
        }

        Ok(Self { templates })
    }

    /// Looks a template up by runtime type tag.
    #[must_use]
    pub fn by_type(&self, type_tag: i64) -> Option<&TemplateClass> {
        let index = if type_tag == GLOBAL_TYPE {
            0
        } else if type_tag >= OBJECT_TYPE {
            usize::try_from(type_tag - OBJECT_TYPE).ok()? + 1
        } else {
            return None;
        };
        self.templates.get(index)
    }

    /// Looks a template up by the pool index of its `Class` value.
    #[must_use]
    pub fn by_pool_index(&self, pool_index: u16) -> Option<&TemplateClass> {
        self.templates.iter().find(|t| t.pool_index == Some(pool_index))
    }

    /// Number of variable slots for instances of `type_tag`, used by the
    /// collector to size objects.
    #[must_use]
    pub fn nvars(&self, type_tag: i64) -> Option<usize> {
        self.by_type(type_tag).map(TemplateClass::nvars)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::compile, parser::parse};

    fn table_for(source: &str) -> (Program, ClassTable) {
        let ast = parse(source).expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        let table = ClassTable::build(&program).expect("class table build failed");
        (program, table)
    }

    #[test]
    fn test_global_template_lists_globals() {
        let (_, table) = table_for("var x = 1\nvar y = 2\ndefn f():\n    1\n");
        let global = table.by_type(GLOBAL_TYPE).expect("no global template");
        assert_eq!(global.nvars(), 2);
        assert_eq!(global.slot_index("x"), Some(0));
        assert_eq!(global.slot_index("y"), Some(1));
        assert!(global.methods.contains_key("f"));
    }

    #[test]
    fn test_object_classes_numbered_from_object_type() {
        let (_, table) = table_for(
            "var a = object:\n    var x = 1\nvar b = object:\n    var y = 1\n    var z = 2\n",
        );
        let first = table.by_type(OBJECT_TYPE).expect("no first class");
        let second = table.by_type(OBJECT_TYPE + 1).expect("no second class");
        assert_eq!(first.nvars(), 1);
        assert_eq!(second.nvars(), 2);
        assert_eq!(second.slot_index("z"), Some(1));
    }

    #[test]
    fn test_methods_in_dispatch_table_not_layout() {
        let (_, table) = table_for("var a = object:\n    var x = 1\n    method m():\n        1\n");
        let template = table.by_type(OBJECT_TYPE).expect("no class");
        assert_eq!(template.nvars(), 1);
        assert!(template.methods.contains_key("m"));
        assert_eq!(template.slot_index("m"), None);
    }

    #[test]
    fn test_lookup_by_pool_index_matches_type() {
        let (program, table) = table_for("var a = object:\n    var x = 1\n");
        let class_pool_idx = program
            .values
            .iter()
            .position(|v| matches!(v, Value::Class { .. }))
            .expect("no class value");
        let template = table
            .by_pool_index(u16::try_from(class_pool_idx).expect("pool index"))
            .expect("template not found");
        assert_eq!(template.type_tag, OBJECT_TYPE);
    }

    #[test]
    fn test_unknown_type_is_none() {
        let (_, table) = table_for("var x = 1\n");
        assert!(table.by_type(ARRAY_TYPE).is_none());
        assert!(table.by_type(OBJECT_TYPE).is_none());
    }
}
