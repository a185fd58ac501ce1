//! The schema catalog.
//!
//! Answers every metadata question the query layer asks: which table holds a
//! field, what a class's ancestry is, and how a named relation joins. The
//! catalog is built once from a [`SchemaDeclaration`], validated up front,
//! and shared behind an `Arc`. Relation resolution is memoised and can be
//! cleared with [`SchemaCatalog::reset`].

use super::declaration::{
    ClassDeclaration, ManyManyDeclaration, OneToOneDeclaration, SchemaDeclaration, split_dotted,
};
use super::field::{FieldOptions, FieldSpec, FieldType};
use super::relation::{JoinSource, ManyManyComponent, Relation, RelationKind, RemoteJoin};
use crate::error::{Error, Result, SchemaErrorKind};
use crate::ordered::OrderedMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Columns every base table carries, in this order.
pub const FIXED_FIELDS: [&str; 4] = ["ID", "ClassName", "LastEdited", "Created"];

#[derive(Debug)]
struct ClassMeta {
    decl: ClassDeclaration,
    table: String,
    has_table: bool,
    /// Physical columns of this class's own table, `ID` first.
    columns: OrderedMap<FieldType>,
    /// Composite fields declared on this class.
    composites: OrderedMap<FieldType>,
    children: Vec<String>,
}

#[derive(Debug)]
pub struct SchemaCatalog {
    classes: OrderedMap<ClassMeta>,
    tables: HashMap<String, String>,
    relations: Mutex<HashMap<(String, String), Option<Relation>>>,
}

fn invalid(message: String) -> Error {
    Error::schema(SchemaErrorKind::InvalidDeclaration, message)
}

fn add_column(
    columns: &mut OrderedMap<FieldType>,
    class: &str,
    name: String,
    field_type: FieldType,
) -> Result<()> {
    if columns.contains_key(&name) {
        return Err(invalid(format!(
            "class '{}' declares column '{}' twice",
            class, name
        )));
    }
    columns.insert(name, field_type);
    Ok(())
}

fn add_field(
    columns: &mut OrderedMap<FieldType>,
    composites: &mut OrderedMap<FieldType>,
    class: &str,
    name: &str,
    field_type: FieldType,
) -> Result<()> {
    if field_type.is_composite() {
        for (suffix, sub) in field_type.composite_columns() {
            add_column(columns, class, format!("{}{}", name, suffix), sub)?;
        }
        composites.insert(name, field_type);
        Ok(())
    } else {
        add_column(columns, class, name.to_string(), field_type)
    }
}

impl SchemaCatalog {
    /// Validate a declaration and build the catalog.
    pub fn new(declaration: SchemaDeclaration) -> Result<Self> {
        let mut classes: OrderedMap<ClassMeta> = OrderedMap::new();
        for decl in declaration.classes {
            if decl.name.is_empty() {
                return Err(invalid("class declared without a name".to_string()));
            }
            if classes.contains_key(&decl.name) {
                return Err(invalid(format!("class '{}' declared twice", decl.name)));
            }
            let mut seen = HashSet::new();
            for (relation, kind) in decl.relation_names() {
                if !seen.insert(relation) {
                    return Err(invalid(format!(
                        "class '{}' declares relation '{}' under more than one kind (again as {})",
                        decl.name, relation, kind
                    )));
                }
            }
            let table = decl.table.clone().unwrap_or_else(|| decl.name.clone());
            let name = decl.name.clone();
            classes.insert(
                name,
                ClassMeta {
                    decl,
                    table,
                    has_table: false,
                    columns: OrderedMap::new(),
                    composites: OrderedMap::new(),
                    children: Vec::new(),
                },
            );
        }

        let names: Vec<String> = classes.keys().map(str::to_string).collect();
        for name in &names {
            let parent = classes.get(name).and_then(|m| m.decl.parent.clone());
            if let Some(parent) = parent {
                match classes.get_mut(&parent) {
                    Some(meta) => meta.children.push(name.clone()),
                    None => {
                        return Err(invalid(format!(
                            "class '{}' extends unknown class '{}'",
                            name, parent
                        )));
                    }
                }
            }
        }

        let mut catalog = Self {
            classes,
            tables: HashMap::new(),
            relations: Mutex::new(HashMap::new()),
        };

        for name in &names {
            catalog.ancestry(name)?;
        }
        for name in &names {
            catalog.build_columns(name)?;
        }
        for name in &names {
            catalog.check_collisions(name)?;
        }
        for name in &names {
            let meta = catalog.meta(name)?;
            if !meta.has_table {
                continue;
            }
            let table = meta.table.clone();
            if let Some(other) = catalog.tables.insert(table.clone(), name.clone()) {
                return Err(invalid(format!(
                    "table '{}' is used by both '{}' and '{}'",
                    table, other, name
                )));
            }
        }
        catalog.validate_relations()?;

        tracing::debug!(
            classes = catalog.classes.len(),
            tables = catalog.tables.len(),
            "Built schema catalog"
        );
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(SchemaDeclaration::from_json(json)?)
    }

    fn build_columns(&mut self, class: &str) -> Result<()> {
        let meta = self.meta(class)?;
        let is_base = meta.decl.parent.is_none();
        let mut columns = OrderedMap::new();
        let mut composites = OrderedMap::new();

        if is_base {
            columns.insert("ID", FieldType::PrimaryKey);
            columns.insert("ClassName", FieldType::ClassName);
            columns.insert("LastEdited", FieldType::Datetime);
            columns.insert("Created", FieldType::Datetime);
        }
        for (field, spec) in meta.decl.fields.iter() {
            if FIXED_FIELDS.contains(&field) {
                return Err(invalid(format!(
                    "class '{}' declares reserved field '{}'",
                    class, field
                )));
            }
            let field_type = FieldType::parse(spec)?;
            add_field(&mut columns, &mut composites, class, field, field_type)?;
        }
        for (relation, target) in meta.decl.one_to_one.iter() {
            if target.is_polymorphic() {
                let field_type = FieldType::PolymorphicForeignKey {
                    relation_aware: target.is_multi_relational(),
                };
                add_field(&mut columns, &mut composites, class, relation, field_type)?;
            } else {
                add_column(
                    &mut columns,
                    class,
                    format!("{}ID", relation),
                    FieldType::ForeignKey,
                )?;
            }
        }

        let has_table = is_base || !columns.is_empty();
        if has_table && !is_base {
            let mut with_id = OrderedMap::new();
            with_id.insert("ID", FieldType::PrimaryKey);
            with_id.extend(columns);
            columns = with_id;
        }

        if let Some(meta) = self.classes.get_mut(class) {
            meta.columns = columns;
            meta.composites = composites;
            meta.has_table = has_table;
        }
        Ok(())
    }

    fn check_collisions(&self, class: &str) -> Result<()> {
        let meta = self.meta(class)?;
        for ancestor in self.ancestry(class)? {
            if ancestor == class {
                continue;
            }
            let other = self.meta(&ancestor)?;
            let clash = meta
                .columns
                .keys()
                .chain(meta.composites.keys())
                .filter(|name| *name != "ID")
                .find(|name| other.columns.contains_key(name) || other.composites.contains_key(name));
            if let Some(name) = clash {
                return Err(Error::schema(
                    SchemaErrorKind::FieldCollision,
                    format!(
                        "field '{}' on '{}' collides with the same field on ancestor '{}'",
                        name, class, ancestor
                    ),
                ));
            }
        }
        Ok(())
    }

    fn validate_relations(&self) -> Result<()> {
        for (name, meta) in self.classes.iter() {
            let known = |target: &str, relation: &str| -> Result<()> {
                if self.classes.contains_key(target) {
                    Ok(())
                } else {
                    Err(invalid(format!(
                        "relation '{}' on '{}' points at unknown class '{}'",
                        relation, name, target
                    )))
                }
            };
            for (relation, target) in meta.decl.one_to_one.iter() {
                if !target.is_polymorphic() {
                    known(target.class(), relation)?;
                }
            }
            for (relation, target) in meta
                .decl
                .reverse_one_to_one
                .iter()
                .chain(meta.decl.one_to_many.iter())
                .chain(meta.decl.reverse_many_to_many.iter())
            {
                known(split_dotted(target)?.0, relation)?;
            }
            for (relation, decl) in meta.decl.many_to_many.iter() {
                match decl {
                    ManyManyDeclaration::Class(target) => known(target, relation)?,
                    ManyManyDeclaration::Through { through, .. } => known(through, relation)?,
                }
                self.build_many_many(name, relation, decl)?;
            }
            for relation in meta.decl.many_many_extra_fields.keys() {
                if !matches!(
                    meta.decl.many_to_many.get(relation),
                    Some(ManyManyDeclaration::Class(_))
                ) {
                    return Err(invalid(format!(
                        "extra fields declared for '{}' on '{}', which is not a many_many with a join table",
                        relation, name
                    )));
                }
            }
        }
        Ok(())
    }

    fn meta(&self, class: &str) -> Result<&ClassMeta> {
        self.classes
            .get(class)
            .ok_or_else(|| Error::unknown_class(class))
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// All classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys()
    }

    pub fn parent_class(&self, class: &str) -> Result<Option<&str>> {
        Ok(self.meta(class)?.decl.parent.as_deref())
    }

    /// Ancestry from the root class down to `class`, inclusive.
    pub fn ancestry(&self, class: &str) -> Result<Vec<String>> {
        let mut chain = vec![class.to_string()];
        let mut current = self.meta(class)?;
        while let Some(parent) = &current.decl.parent {
            if chain.len() > self.classes.len() {
                return Err(invalid(format!(
                    "inheritance cycle involving '{}'",
                    class
                )));
            }
            chain.push(parent.clone());
            current = self.meta(parent)?;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestry(class)
            .map(|chain| chain.iter().any(|c| c == ancestor))
            .unwrap_or(false)
    }

    /// `class` followed by all its descendants, depth first.
    pub fn subclasses_for(&self, class: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![class.to_string()];
        while let Some(next) = stack.pop() {
            let meta = self.meta(&next)?;
            stack.extend(meta.children.iter().rev().cloned());
            out.push(next);
        }
        Ok(out)
    }

    /// Ancestry of `class` followed by its strict descendants.
    pub fn data_classes_for(&self, class: &str) -> Result<Vec<String>> {
        let mut out = self.ancestry(class)?;
        out.extend(self.subclasses_for(class)?.into_iter().skip(1));
        Ok(out)
    }

    pub fn base_class(&self, class: &str) -> Result<String> {
        self.ancestry(class)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::unknown_class(class))
    }

    /// Table name of a class, whether or not the class owns a table.
    pub fn table_name(&self, class: &str) -> Result<&str> {
        Ok(&self.meta(class)?.table)
    }

    /// Table owned by `class`, if it declares any columns of its own.
    pub fn table_for(&self, class: &str) -> Result<Option<&str>> {
        let meta = self.meta(class)?;
        Ok(meta.has_table.then_some(meta.table.as_str()))
    }

    pub fn class_has_table(&self, class: &str) -> Result<bool> {
        Ok(self.meta(class)?.has_table)
    }

    /// Table of the root ancestor, which holds `ID` and `ClassName`.
    pub fn base_table(&self, class: &str) -> Result<&str> {
        let base = self.base_class(class)?;
        Ok(&self.meta(&base)?.table)
    }

    pub fn class_for_table(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Physical columns of the class's own table.
    pub fn database_fields(&self, class: &str) -> Result<&OrderedMap<FieldType>> {
        Ok(&self.meta(class)?.columns)
    }

    /// Composite fields declared on the class itself.
    pub fn composite_fields(&self, class: &str) -> Result<&OrderedMap<FieldType>> {
        Ok(&self.meta(class)?.composites)
    }

    /// Composite field named `field` on `class` or an ancestor.
    pub fn composite_field(&self, class: &str, field: &str) -> Result<Option<FieldType>> {
        for ancestor in self.ancestry(class)?.iter().rev() {
            if let Some(field_type) = self.meta(ancestor)?.composites.get(field) {
                return Ok(Some(field_type.clone()));
            }
        }
        Ok(None)
    }

    /// Field specs for a class, base fixed fields first, then each class
    /// from root to leaf in declaration order.
    pub fn field_specs(&self, class: &str, options: FieldOptions) -> Result<OrderedMap<FieldSpec>> {
        let classes = if options.uninherited {
            self.meta(class)?;
            vec![class.to_string()]
        } else {
            self.ancestry(class)?
        };
        let mut specs = OrderedMap::new();
        for table_class in &classes {
            let meta = self.meta(table_class)?;
            let owner = options.include_class_prefix.then(|| table_class.clone());
            let mut add = |name: &str, field_type: &FieldType| {
                specs.insert(
                    name,
                    FieldSpec {
                        name: name.to_string(),
                        field_type: field_type.clone(),
                        class: owner.clone(),
                    },
                );
            };
            for (name, field_type) in meta.columns.iter() {
                add(name, field_type);
            }
            if !options.db_only {
                for (name, field_type) in meta.composites.iter() {
                    add(name, field_type);
                }
            }
        }
        Ok(specs)
    }

    /// Class in `class`'s ancestry whose table stores `field`.
    ///
    /// Fixed fields always live on the base class. The walk goes from the
    /// most specific class to the root.
    pub fn class_for_field(&self, class: &str, field: &str) -> Result<Option<String>> {
        if FIXED_FIELDS.contains(&field) {
            return self.base_class(class).map(Some);
        }
        for ancestor in self.ancestry(class)?.into_iter().rev() {
            if self.meta(&ancestor)?.columns.contains_key(field) {
                return Ok(Some(ancestor));
            }
        }
        Ok(None)
    }

    pub fn table_for_field(&self, class: &str, field: &str) -> Result<Option<String>> {
        match self.class_for_field(class, field)? {
            Some(owner) => Ok(Some(self.meta(&owner)?.table.clone())),
            None => Ok(None),
        }
    }

    /// Whether `field` is a physical column or composite field of the
    /// class or one of its ancestors.
    pub fn has_field(&self, class: &str, field: &str) -> Result<bool> {
        Ok(self.class_for_field(class, field)?.is_some()
            || self.composite_field(class, field)?.is_some())
    }

    /// Quoted `"<prefix><table>"."<field>"` for a field of `class`.
    pub fn sql_column_for_field(&self, class: &str, field: &str, prefix: &str) -> Result<String> {
        let table = self.table_for_field(class, field)?.ok_or_else(|| {
            Error::InvalidArgument(format!("'{}' is not a field on class '{}'", field, class))
        })?;
        Ok(format!("\"{}{}\".\"{}\"", prefix, table, field))
    }

    /// Default sort of the class or its nearest ancestor declaring one.
    pub fn default_sort(&self, class: &str) -> Result<Option<&str>> {
        for ancestor in self.ancestry(class)?.iter().rev() {
            if let Some(sort) = self.meta(ancestor)?.decl.default_sort.as_deref() {
                return Ok(Some(sort));
            }
        }
        Ok(None)
    }

    /// Find a declaration on `class` or its nearest ancestor, returning the
    /// declaring class with it.
    fn find_declared<'a, T>(
        &'a self,
        class: &str,
        pick: impl Fn(&'a ClassDeclaration) -> Option<&'a T>,
    ) -> Result<Option<(String, &'a T)>> {
        for ancestor in self.ancestry(class)?.into_iter().rev() {
            let meta = self.meta(&ancestor)?;
            if let Some(found) = pick(&meta.decl) {
                return Ok(Some((ancestor, found)));
            }
        }
        Ok(None)
    }

    /// One-to-one declarations of a class including inherited ones.
    fn merged_one_to_one(&self, class: &str) -> Result<Vec<(String, OneToOneDeclaration)>> {
        let mut merged = Vec::new();
        for ancestor in self.ancestry(class)? {
            for (name, decl) in self.meta(&ancestor)?.decl.one_to_one.iter() {
                merged.push((name.to_string(), decl.clone()));
            }
        }
        Ok(merged)
    }

    /// Resolve a named relation on a class.
    ///
    /// Kinds are tried in a fixed order: one-to-one, reverse one-to-one,
    /// one-to-many, many-to-many (including through), reverse many-to-many.
    /// Relations declared on ancestors are inherited.
    pub fn resolve_relation(&self, class: &str, name: &str) -> Result<Option<Relation>> {
        let key = (class.to_string(), name.to_string());
        {
            let cache = self.relations.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }
        let resolved = self.resolve_uncached(class, name)?;
        self.relations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&self, class: &str, name: &str) -> Result<Option<Relation>> {
        self.meta(class)?;

        if let Some((owner, decl)) = self.find_declared(class, |d| d.one_to_one.get(name))? {
            return Ok(Some(Relation::OneToOne {
                name: name.to_string(),
                owner,
                target: (!decl.is_polymorphic()).then(|| decl.class().to_string()),
                relation_aware: decl.is_multi_relational(),
            }));
        }
        if let Some((owner, target)) =
            self.find_declared(class, |d| d.reverse_one_to_one.get(name))?
        {
            let remote = self.remote_join_field(class, name, RelationKind::ReverseOneToOne)?;
            return Ok(Some(Relation::ReverseOneToOne {
                name: name.to_string(),
                owner,
                target: split_dotted(target)?.0.to_string(),
                remote,
            }));
        }
        if let Some((owner, target)) = self.find_declared(class, |d| d.one_to_many.get(name))? {
            let remote = self.remote_join_field(class, name, RelationKind::OneToMany)?;
            return Ok(Some(Relation::OneToMany {
                name: name.to_string(),
                owner,
                target: split_dotted(target)?.0.to_string(),
                remote,
            }));
        }
        if let Some(component) = self.forward_many_many(class, name)? {
            let name = name.to_string();
            return Ok(Some(match component.join {
                JoinSource::Table(_) => Relation::ManyToMany { name, component },
                JoinSource::Through(_) => Relation::ManyToManyThrough { name, component },
            }));
        }
        if let Some(component) = self.reverse_many_many(class, name)? {
            return Ok(Some(Relation::ReverseManyToMany {
                name: name.to_string(),
                component,
            }));
        }
        Ok(None)
    }

    /// Locate the one-to-one on the remote class that backs a one-to-many
    /// or reverse one-to-one relation of `class`.
    ///
    /// An explicit `Class.Field` target wins. Otherwise the remote class's
    /// one-to-one fields are matched against `class`'s ancestry, most
    /// specific first; polymorphic fields are the last resort.
    pub fn remote_join_field(
        &self,
        class: &str,
        relation: &str,
        kind: RelationKind,
    ) -> Result<RemoteJoin> {
        let found = match kind {
            RelationKind::OneToMany => self.find_declared(class, |d| d.one_to_many.get(relation))?,
            RelationKind::ReverseOneToOne => {
                self.find_declared(class, |d| d.reverse_one_to_one.get(relation))?
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "remote join fields only exist for one_to_many and reverse_one_to_one, not {}",
                    other.as_str()
                )));
            }
        };
        let (_, target) = found.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "unknown {} relation '{}' on class '{}'",
                kind.as_str(),
                relation,
                class
            ))
        })?;
        let (remote_class, explicit) = split_dotted(target)?;
        let remote_ones = self.merged_one_to_one(remote_class)?;

        if let Some(field) = explicit {
            let (_, decl) = remote_ones
                .iter()
                .find(|(name, _)| name == field)
                .ok_or_else(|| {
                    invalid(format!(
                        "missing one_to_one '{}' on '{}' referenced by {} '{}' on '{}'",
                        field,
                        remote_class,
                        kind.as_str(),
                        relation,
                        class
                    ))
                })?;
            return Ok(RemoteJoin::new(
                field,
                decl.is_polymorphic(),
                decl.is_multi_relational(),
            ));
        }

        for ancestor in self.ancestry(class)?.iter().rev() {
            let candidates: Vec<&String> = remote_ones
                .iter()
                .filter(|(_, decl)| !decl.is_polymorphic() && decl.class() == ancestor)
                .map(|(name, _)| name)
                .collect();
            match candidates.as_slice() {
                [] => continue,
                [only] => return Ok(RemoteJoin::new(only, false, false)),
                several => {
                    return Err(Error::ambiguous(
                        class,
                        relation,
                        format!(
                            "'{}' has several one_to_one fields pointing at '{}' ({}); use '{}.<Field>'",
                            remote_class,
                            ancestor,
                            several.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
                            remote_class
                        ),
                    ));
                }
            }
        }

        let polymorphic: Vec<&(String, OneToOneDeclaration)> = remote_ones
            .iter()
            .filter(|(_, decl)| decl.is_polymorphic())
            .collect();
        match polymorphic.as_slice() {
            [(name, decl)] => Ok(RemoteJoin::new(name, true, decl.is_multi_relational())),
            [] => Err(Error::ambiguous(
                class,
                relation,
                format!(
                    "no one_to_one on '{}' points at '{}' or its ancestors",
                    remote_class, class
                ),
            )),
            _ => Err(Error::ambiguous(
                class,
                relation,
                format!(
                    "'{}' has several polymorphic one_to_one fields; use '{}.<Field>'",
                    remote_class, remote_class
                ),
            )),
        }
    }

    /// Many-to-many component for a forward or reverse declaration.
    pub fn many_many_component(&self, class: &str, name: &str) -> Result<Option<ManyManyComponent>> {
        match self.forward_many_many(class, name)? {
            Some(component) => Ok(Some(component)),
            None => self.reverse_many_many(class, name),
        }
    }

    fn forward_many_many(&self, class: &str, name: &str) -> Result<Option<ManyManyComponent>> {
        match self.find_declared(class, |d| d.many_to_many.get(name))? {
            Some((owner, decl)) => self.build_many_many(&owner, name, decl).map(Some),
            None => Ok(None),
        }
    }

    fn build_many_many(
        &self,
        owner: &str,
        name: &str,
        decl: &ManyManyDeclaration,
    ) -> Result<ManyManyComponent> {
        match decl {
            ManyManyDeclaration::Class(target) => {
                self.meta(target)?;
                let join_table = format!("{}_{}", self.table_name(owner)?, name);
                let child_field = if owner == target {
                    "ChildID".to_string()
                } else {
                    format!("{}ID", target)
                };
                let mut extra_fields = OrderedMap::new();
                if let Some(fields) = self.meta(owner)?.decl.many_many_extra_fields.get(name) {
                    for (field, spec) in fields.iter() {
                        extra_fields.insert(field, FieldType::parse(spec)?);
                    }
                }
                Ok(ManyManyComponent {
                    parent_class: owner.to_string(),
                    child_class: target.clone(),
                    parent_field: format!("{}ID", owner),
                    child_field,
                    join: JoinSource::Table(join_table.clone()),
                    join_table,
                    extra_fields,
                })
            }
            ManyManyDeclaration::Through { through, from, to } => {
                let ones = self.merged_one_to_one(through)?;
                let lookup = |field: &str| -> Result<OneToOneDeclaration> {
                    let (_, decl) = ones.iter().find(|(n, _)| n == field).ok_or_else(|| {
                        invalid(format!(
                            "many_many '{}' on '{}': '{}' is not a one_to_one on '{}'",
                            name, owner, field, through
                        ))
                    })?;
                    if decl.is_polymorphic() {
                        return Err(invalid(format!(
                            "many_many '{}' on '{}': '{}.{}' must not be polymorphic",
                            name, owner, through, field
                        )));
                    }
                    Ok(decl.clone())
                };
                let from_decl = lookup(from)?;
                let to_decl = lookup(to)?;
                if !self.is_subclass_of(owner, from_decl.class()) {
                    return Err(invalid(format!(
                        "many_many '{}' on '{}': '{}.{}' points at '{}'",
                        name,
                        owner,
                        through,
                        from,
                        from_decl.class()
                    )));
                }

                let parent_field = format!("{}ID", from);
                let child_field = format!("{}ID", to);
                let join_table = self
                    .table_for_field(through, &parent_field)?
                    .ok_or_else(|| invalid(format!("'{}' has no column '{}'", through, parent_field)))?;
                if self.table_for_field(through, &child_field)?.as_deref() != Some(join_table.as_str()) {
                    return Err(invalid(format!(
                        "many_many '{}' on '{}': '{}' and '{}' must live in the same table of '{}'",
                        name, owner, parent_field, child_field, through
                    )));
                }

                let mut extra_fields = OrderedMap::new();
                for (field, spec) in self.field_specs(through, FieldOptions::new().db_only())?.iter() {
                    if FIXED_FIELDS.contains(&field) || field == parent_field || field == child_field {
                        continue;
                    }
                    extra_fields.insert(field, spec.field_type.clone());
                }

                Ok(ManyManyComponent {
                    parent_class: owner.to_string(),
                    child_class: to_decl.class().to_string(),
                    parent_field,
                    child_field,
                    join: JoinSource::Through(through.clone()),
                    join_table,
                    extra_fields,
                })
            }
        }
    }

    fn reverse_many_many(&self, class: &str, name: &str) -> Result<Option<ManyManyComponent>> {
        let Some((_, target)) = self.find_declared(class, |d| d.reverse_many_to_many.get(name))?
        else {
            return Ok(None);
        };
        let (target_class, explicit) = split_dotted(target)?;

        let forward = match explicit {
            Some(relation) => {
                let (owner, decl) = self
                    .find_declared(target_class, |d| d.many_to_many.get(relation))?
                    .ok_or_else(|| {
                        invalid(format!(
                            "reverse_many_to_many '{}' on '{}': no many_many '{}' on '{}'",
                            name, class, relation, target_class
                        ))
                    })?;
                self.build_many_many(&owner, relation, decl)?
            }
            None => {
                let ours = self.ancestry(class)?;
                let mut candidates = Vec::new();
                for ancestor in self.ancestry(target_class)? {
                    for (relation, decl) in self.meta(&ancestor)?.decl.many_to_many.iter() {
                        let component = self.build_many_many(&ancestor, relation, decl)?;
                        if ours.contains(&component.child_class) {
                            candidates.push(component);
                        }
                    }
                }
                match candidates.len() {
                    1 => candidates.remove(0),
                    0 => {
                        return Err(Error::ambiguous(
                            class,
                            name,
                            format!("no many_many on '{}' points at '{}'", target_class, class),
                        ));
                    }
                    _ => {
                        return Err(Error::ambiguous(
                            class,
                            name,
                            format!(
                                "several many_many relations on '{}' point at '{}'; use '{}.<Relation>'",
                                target_class, class, target_class
                            ),
                        ));
                    }
                }
            }
        };

        if !self.is_subclass_of(class, &forward.child_class) {
            return Err(invalid(format!(
                "reverse_many_to_many '{}' on '{}' matches a relation targeting '{}'",
                name, class, forward.child_class
            )));
        }

        Ok(Some(ManyManyComponent {
            parent_class: forward.child_class,
            child_class: forward.parent_class,
            parent_field: forward.child_field,
            child_field: forward.parent_field,
            join: forward.join,
            join_table: forward.join_table,
            extra_fields: forward.extra_fields,
        }))
    }

    /// Implicit join tables of every many-to-many declaration.
    pub fn many_many_join_tables(&self) -> Result<Vec<ManyManyComponent>> {
        let mut out = Vec::new();
        for (name, meta) in self.classes.iter() {
            for (relation, decl) in meta.decl.many_to_many.iter() {
                if matches!(decl, ManyManyDeclaration::Class(_)) {
                    out.push(self.build_many_many(name, relation, decl)?);
                }
            }
        }
        Ok(out)
    }

    /// Drop memoised relation resolutions.
    pub fn reset(&self) {
        self.relations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn league() -> SchemaCatalog {
        SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(
                    ClassDeclaration::new("Team")
                        .field("Title", "Varchar")
                        .field("Budget", "Money")
                        .has_many("Players", "Player")
                        .has_many("Comments", "Comment")
                        .many_many("Sponsors", "Sponsor")
                        .many_many_extra_field("Sponsors", "Amount", "Int"),
                )
                .class(
                    ClassDeclaration::new("Player")
                        .field("Name", "Varchar")
                        .has_one("Team", "Team"),
                )
                .class(ClassDeclaration::new("Captain").parent("Player").field("Armband", "Boolean"))
                .class(ClassDeclaration::new("Reserve").parent("Player"))
                .class(
                    ClassDeclaration::new("Sponsor")
                        .field("Title", "Varchar")
                        .belongs_many_many("Teams", "Team"),
                )
                .class(
                    ClassDeclaration::new("Comment")
                        .field("Body", "Text")
                        .has_one_polymorphic("Parent", false),
                ),
        )
        .unwrap()
    }

    #[test]
    fn tables_and_ancestry() {
        let catalog = league();
        assert_eq!(catalog.ancestry("Captain").unwrap(), vec!["Player", "Captain"]);
        assert_eq!(catalog.table_for("Captain").unwrap(), Some("Captain"));
        assert_eq!(catalog.table_for("Reserve").unwrap(), None);
        assert_eq!(catalog.base_table("Reserve").unwrap(), "Player");
        assert_eq!(
            catalog.subclasses_for("Player").unwrap(),
            vec!["Player", "Captain", "Reserve"]
        );
        assert_eq!(catalog.class_for_table("Captain"), Some("Captain"));
        assert_eq!(
            catalog.table_for("Nope").unwrap_err().schema_kind(),
            Some(SchemaErrorKind::UnknownClass)
        );
    }

    #[test]
    fn field_specs_order_and_composites() {
        let catalog = league();
        let specs = catalog.field_specs("Team", FieldOptions::new()).unwrap();
        assert_eq!(
            specs.keys().collect::<Vec<_>>(),
            vec![
                "ID",
                "ClassName",
                "LastEdited",
                "Created",
                "Title",
                "BudgetAmount",
                "BudgetCurrency",
                "Budget"
            ]
        );
        let db_only = catalog.field_specs("Team", FieldOptions::new().db_only()).unwrap();
        assert!(!db_only.contains_key("Budget"));

        let captain = catalog
            .field_specs("Captain", FieldOptions::new().include_class_prefix())
            .unwrap();
        assert_eq!(captain.get("Armband").unwrap().class.as_deref(), Some("Captain"));
        assert_eq!(captain.get("TeamID").unwrap().class.as_deref(), Some("Player"));

        let own = catalog
            .field_specs("Captain", FieldOptions::new().uninherited())
            .unwrap();
        assert_eq!(own.keys().collect::<Vec<_>>(), vec!["ID", "Armband"]);
    }

    #[test]
    fn table_for_field_walks_ancestry() {
        let catalog = league();
        assert_eq!(
            catalog.table_for_field("Captain", "Name").unwrap().as_deref(),
            Some("Player")
        );
        assert_eq!(
            catalog.table_for_field("Captain", "ClassName").unwrap().as_deref(),
            Some("Player")
        );
        assert_eq!(catalog.table_for_field("Player", "Armband").unwrap(), None);
        assert_eq!(
            catalog.sql_column_for_field("Captain", "Armband", "team_").unwrap(),
            "\"team_Captain\".\"Armband\""
        );
        assert!(matches!(
            catalog.sql_column_for_field("Player", "Nope", ""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn relation_precedence_and_inheritance() {
        let catalog = league();
        let team = catalog.resolve_relation("Captain", "Team").unwrap().unwrap();
        assert_eq!(team.kind(), RelationKind::OneToOne);
        assert_eq!(team.target_class(), Some("Team"));

        let players = catalog.resolve_relation("Team", "Players").unwrap().unwrap();
        let remote = players.remote_join().unwrap();
        assert_eq!(remote.join_column, "TeamID");
        assert!(!remote.polymorphic);

        let comments = catalog.resolve_relation("Team", "Comments").unwrap().unwrap();
        let remote = comments.remote_join().unwrap();
        assert_eq!(remote.field, "Parent");
        assert!(remote.polymorphic);

        assert!(catalog.resolve_relation("Team", "Nothing").unwrap().is_none());
    }

    #[test]
    fn many_many_both_directions() {
        let catalog = league();
        let forward = catalog.many_many_component("Team", "Sponsors").unwrap().unwrap();
        assert_eq!(forward.join_table, "Team_Sponsors");
        assert_eq!(forward.parent_field, "TeamID");
        assert_eq!(forward.child_field, "SponsorID");
        assert!(forward.extra_fields.contains_key("Amount"));

        let reverse = catalog.many_many_component("Sponsor", "Teams").unwrap().unwrap();
        assert_eq!(reverse.join_table, "Team_Sponsors");
        assert_eq!(reverse.parent_field, "SponsorID");
        assert_eq!(reverse.child_field, "TeamID");
        assert_eq!(reverse.child_class, "Team");
        assert_eq!(catalog.many_many_join_tables().unwrap().len(), 1);
    }

    #[test]
    fn many_many_through_entity() {
        let catalog = SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(
                    ClassDeclaration::new("Player")
                        .field("Name", "Varchar")
                        .many_many_through("Sponsors", "Deal", "Player", "Sponsor"),
                )
                .class(
                    ClassDeclaration::new("Sponsor")
                        .field("Title", "Varchar")
                        .belongs_many_many("Players", "Player"),
                )
                .class(
                    ClassDeclaration::new("Deal")
                        .field("Amount", "Int")
                        .has_one("Player", "Player")
                        .has_one("Sponsor", "Sponsor"),
                ),
        )
        .unwrap();

        let forward = catalog.many_many_component("Player", "Sponsors").unwrap().unwrap();
        assert_eq!(forward.join, JoinSource::Through("Deal".to_string()));
        assert_eq!(forward.join_table, "Deal");
        assert_eq!(forward.parent_field, "PlayerID");
        assert_eq!(forward.child_field, "SponsorID");
        assert_eq!(forward.extra_fields.keys().collect::<Vec<_>>(), vec!["Amount"]);
        assert_eq!(
            catalog.resolve_relation("Player", "Sponsors").unwrap().unwrap().kind(),
            RelationKind::ManyToManyThrough
        );

        let reverse = catalog.many_many_component("Sponsor", "Players").unwrap().unwrap();
        assert_eq!(reverse.parent_field, "SponsorID");
        assert_eq!(reverse.child_field, "PlayerID");
        assert_eq!(reverse.child_class, "Player");
        assert_eq!(reverse.join, forward.join);
        assert_eq!(reverse.extra_fields, forward.extra_fields);

        // resolving twice gives the same component
        assert_eq!(
            catalog.many_many_component("Player", "Sponsors").unwrap(),
            Some(forward)
        );
        // the through class owns its table; nothing implicit to create
        assert!(catalog.many_many_join_tables().unwrap().is_empty());
    }

    #[test]
    fn ambiguous_remote_join() {
        let catalog = SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(ClassDeclaration::new("Match").has_many("Teams", "Team"))
                .class(
                    ClassDeclaration::new("Team")
                        .has_one("Home", "Match")
                        .has_one("Away", "Match"),
                ),
        )
        .unwrap();
        let err = catalog.resolve_relation("Match", "Teams").unwrap_err();
        assert!(matches!(err, Error::RelationAmbiguity(_)));
    }

    #[test]
    fn field_collision_is_rejected() {
        let err = SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(ClassDeclaration::new("Page").field("Title", "Varchar"))
                .class(ClassDeclaration::new("News").parent("Page").field("Title", "Text")),
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::FieldCollision));
    }

    #[test]
    fn through_keys_must_be_one_to_one() {
        let err = SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(ClassDeclaration::new("Event").many_many_through("Players", "Entry", "Event", "Player"))
                .class(ClassDeclaration::new("Player"))
                .class(ClassDeclaration::new("Entry").has_one("Event", "Event")),
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::InvalidDeclaration));
    }

    #[test]
    fn reset_clears_cache_without_changing_answers() {
        let catalog = league();
        let before = catalog.resolve_relation("Team", "Players").unwrap();
        catalog.reset();
        assert_eq!(catalog.resolve_relation("Team", "Players").unwrap(), before);
    }
}
