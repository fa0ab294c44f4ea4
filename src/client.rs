//! Generic entity builders over the schema graph.
//!
//! One [`Client`] serves every entity declared in its [`Schema`]. Builders
//! collect a [`Mutation`] (or a query), run it through the registered hooks
//! and interceptors, and hand the resulting spec to the graph compiler.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::ClientConfig;
use crate::driver::{Driver, TxDriver};
use crate::errors::GraphSqlError;
use crate::field::Value;
use crate::graph::{
    batch_create, count_nodes, create_node, delete_nodes, query_nodes, update_node, update_nodes,
};
use crate::hook::{
    BoxMutator, Hook, HookRegistry, Interceptor, MutateFn, Mutator, QueryFn, QueryOutput, intercept,
};
use crate::instrument::{DriverMetrics, InstrumentedDriver};
use crate::load::load_edge;
use crate::mutation::{Mutation, MutationOutput, Op};
use crate::record::Record;
use crate::schema::{EdgeDescriptor, EntitySchema, FieldDescriptor, IdDescriptor, Schema};
use crate::spec::{
    BatchCreateSpec, CreateSpec, DeleteSpec, FieldSpec, IdSpec, NodeSpec, QuerySpec, Step,
    UpdateSpec,
};
use crate::sql::{ConflictOption, Predicate, Selector, UpdateSet};
use crate::sqlite::SqliteDriver;

/// Entry point: a driver, the schema graph, hooks and query interceptors.
pub struct Client {
    driver: Box<dyn Driver + Send + Sync>,
    schema: Schema,
    hooks: HookRegistry,
    interceptors: Vec<Arc<dyn Interceptor>>,
    metrics: Option<Arc<DriverMetrics>>,
}

impl Client {
    pub fn new(driver: impl Driver + Send + Sync + 'static, schema: Schema) -> Result<Self, GraphSqlError> {
        schema.validate()?;
        Ok(Self {
            driver: Box::new(driver),
            schema,
            hooks: HookRegistry::new(),
            interceptors: Vec::new(),
            metrics: None,
        })
    }

    /// Opens a SQLite-backed client. With `debug` set, every statement goes
    /// through an instrumented driver whose metrics are kept on the client.
    pub fn open(config: &ClientConfig, schema: Schema) -> Result<Self, GraphSqlError> {
        let sqlite = SqliteDriver::open_with(config)?;
        if !config.debug {
            return Self::new(sqlite, schema);
        }
        let driver = InstrumentedDriver::with_log_capacity(sqlite, config.statement_log_capacity);
        let metrics = driver.metrics();
        let mut client = Self::new(driver, schema)?;
        client.metrics = Some(metrics);
        Ok(client)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn metrics(&self) -> Option<Arc<DriverMetrics>> {
        self.metrics.clone()
    }

    /// Adds a hook run for every entity, outside entity hooks.
    pub fn use_hook(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.use_global(hook);
    }

    pub fn hook(&mut self, entity: impl Into<String>, hook: Arc<dyn Hook>) {
        self.hooks.register(entity, hook);
    }

    /// Registers a hook slot that may be empty. Mutations of `entity` fail
    /// with `UninitializedHook` while it is.
    pub fn hook_slot(&mut self, entity: impl Into<String>, hook: Option<Arc<dyn Hook>>) {
        self.hooks.register_slot(entity, hook);
    }

    pub fn intercept(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    fn ctx(&self) -> Ctx<'_> {
        Ctx {
            driver: self.driver.as_ref(),
            schema: &self.schema,
            hooks: &self.hooks,
            interceptors: &self.interceptors,
        }
    }

    pub fn create(&self, entity: &str) -> Create<'_> {
        Create::new(self.ctx(), entity)
    }

    pub fn create_bulk<'c>(&'c self, builders: Vec<Create<'c>>) -> CreateBulk<'c> {
        CreateBulk::new(self.ctx(), builders)
    }

    pub fn update(&self, entity: &str) -> Update<'_> {
        Update::new(self.ctx(), entity)
    }

    pub fn update_one(&self, entity: &str, id: impl Into<Value>) -> UpdateOne<'_> {
        UpdateOne::new(self.ctx(), entity, vec![id.into()])
    }

    /// Update of a composite-key entity by its full key.
    pub fn update_one_key(&self, entity: &str, key: Vec<Value>) -> UpdateOne<'_> {
        UpdateOne::new(self.ctx(), entity, key)
    }

    pub fn delete(&self, entity: &str) -> Delete<'_> {
        Delete::new(self.ctx(), entity)
    }

    pub fn delete_one(&self, entity: &str, id: impl Into<Value>) -> DeleteOne<'_> {
        DeleteOne::new(self.ctx(), entity, vec![id.into()])
    }

    pub fn delete_one_key(&self, entity: &str, key: Vec<Value>) -> DeleteOne<'_> {
        DeleteOne::new(self.ctx(), entity, key)
    }

    pub fn query(&self, entity: &str) -> Query<'_> {
        Query::new(self.ctx(), entity)
    }

    /// Starts a transaction. Every builder created from the returned handle
    /// runs on it until `commit` or `rollback`; dropping it rolls back.
    pub fn tx(&self) -> Result<ClientTx<'_>, GraphSqlError> {
        let tx = self.driver.tx()?;
        Ok(ClientTx {
            driver: TxDriver::new(tx),
            client: self,
        })
    }
}

/// A client bound to one open transaction.
pub struct ClientTx<'c> {
    driver: TxDriver<'c>,
    client: &'c Client,
}

impl<'c> ClientTx<'c> {
    fn ctx(&self) -> Ctx<'_> {
        Ctx {
            driver: &self.driver,
            schema: &self.client.schema,
            hooks: &self.client.hooks,
            interceptors: &self.client.interceptors,
        }
    }

    pub fn create(&self, entity: &str) -> Create<'_> {
        Create::new(self.ctx(), entity)
    }

    pub fn create_bulk<'t>(&'t self, builders: Vec<Create<'t>>) -> CreateBulk<'t> {
        CreateBulk::new(self.ctx(), builders)
    }

    pub fn update(&self, entity: &str) -> Update<'_> {
        Update::new(self.ctx(), entity)
    }

    pub fn update_one(&self, entity: &str, id: impl Into<Value>) -> UpdateOne<'_> {
        UpdateOne::new(self.ctx(), entity, vec![id.into()])
    }

    pub fn update_one_key(&self, entity: &str, key: Vec<Value>) -> UpdateOne<'_> {
        UpdateOne::new(self.ctx(), entity, key)
    }

    pub fn delete(&self, entity: &str) -> Delete<'_> {
        Delete::new(self.ctx(), entity)
    }

    pub fn delete_one(&self, entity: &str, id: impl Into<Value>) -> DeleteOne<'_> {
        DeleteOne::new(self.ctx(), entity, vec![id.into()])
    }

    pub fn delete_one_key(&self, entity: &str, key: Vec<Value>) -> DeleteOne<'_> {
        DeleteOne::new(self.ctx(), entity, key)
    }

    pub fn query(&self, entity: &str) -> Query<'_> {
        Query::new(self.ctx(), entity)
    }

    pub fn commit(self) -> Result<(), GraphSqlError> {
        self.driver.commit()
    }

    pub fn rollback(self) -> Result<(), GraphSqlError> {
        self.driver.rollback()
    }
}

#[derive(Clone, Copy)]
struct Ctx<'c> {
    driver: &'c dyn Driver,
    schema: &'c Schema,
    hooks: &'c HookRegistry,
    interceptors: &'c [Arc<dyn Interceptor>],
}

/// Runs the terminal step of a mutation exactly once.
fn execute(
    m: &mut Mutation,
    apply: impl FnOnce(&mut Mutation) -> Result<MutationOutput, GraphSqlError>,
) -> Result<MutationOutput, GraphSqlError> {
    m.begin()?;
    let out = apply(m);
    m.finish(out.is_ok());
    out
}

fn field_desc<'s>(entity: &'s EntitySchema, name: &str) -> Result<&'s FieldDescriptor, GraphSqlError> {
    entity.field_desc(name).ok_or_else(|| {
        GraphSqlError::invalid_spec(format!("entity {:?} has no field {name:?}", entity.name))
    })
}

fn edge_desc<'s>(entity: &'s EntitySchema, name: &str) -> Result<&'s EdgeDescriptor, GraphSqlError> {
    entity.edge_desc(name).ok_or_else(|| {
        GraphSqlError::invalid_spec(format!("entity {:?} has no edge {name:?}", entity.name))
    })
}

/// Neighbor keys an edge gets from a mutation: its exposed field, then any
/// ids added to it directly.
fn edge_ids(edge: &EdgeDescriptor, m: &Mutation) -> Vec<Value> {
    let mut ids: Vec<Value> = Vec::new();
    if let Some(v) = edge.field.as_deref().and_then(|f| m.field(f)) {
        if !v.is_null() {
            ids.push(v.clone());
        }
    }
    for id in m.added_ids(&edge.name) {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

fn key_spec(schema: &Schema, entity: &str, key: &[Value]) -> Result<NodeSpec, GraphSqlError> {
    let mut node = schema.node_spec(entity)?;
    let fields: &mut [FieldSpec] = match &mut node.id {
        IdSpec::Single(f) => std::slice::from_mut(f),
        IdSpec::Composite(fs) => fs,
    };
    if fields.len() != key.len() {
        return Err(GraphSqlError::invalid_spec(format!(
            "entity {entity:?} has a {}-column key, got {} values",
            fields.len(),
            key.len()
        )));
    }
    for (f, v) in fields.iter_mut().zip(key) {
        f.value = v.clone();
    }
    Ok(node)
}

fn to_record(entity: &str, node: &NodeSpec, values: Vec<Value>) -> Record {
    let id_column = node.id.single().map(|f| f.column.as_str());
    let mut record = Record::new(entity, Value::Null);
    for (field, value) in node.columns.iter().zip(values) {
        if Some(field.column.as_str()) == id_column {
            record.id = value.clone();
        }
        record.fields.insert(field.column.clone(), value);
    }
    record
}

/// Columns whose stored value an upsert keeps: the key, immutable fields and
/// fields exposing an edge.
fn keep_on_conflict(entity: &EntitySchema) -> Vec<String> {
    let mut columns = Vec::new();
    if let Some(id) = entity.id_field() {
        columns.push(id.column);
    }
    for f in &entity.fields {
        if f.immutable || entity.edge_of_field(&f.name).is_some() {
            columns.push(f.column.clone());
        }
    }
    columns
}

fn update_new_values(entity: &EntitySchema) -> [ConflictOption; 2] {
    let keep = keep_on_conflict(entity);
    [
        ConflictOption::ResolveWithNewValues,
        ConflictOption::resolve_with(move |set: &mut UpdateSet| {
            for column in &keep {
                if set.has_column(column) {
                    set.set_ignore(column);
                }
            }
        }),
    ]
}

fn apply_create_defaults(entity: &EntitySchema, m: &mut Mutation) {
    for f in &entity.fields {
        if m.field(&f.name).is_none() {
            if let Some(default) = &f.default {
                m.set_field(&f.name, default.resolve());
            }
        }
    }
    if let IdDescriptor::Supplied {
        default: Some(default),
        ..
    } = &entity.id
    {
        if m.id().is_none() {
            m.set_id(default.resolve());
        }
    }
}

/// Pre-flight checks of a create: field values, required fields, then
/// required edges. Fields that expose an edge are checked as that edge.
fn check_create(schema: &Schema, m: &Mutation) -> Result<(), GraphSqlError> {
    let entity = schema.get(m.entity())?;
    for (name, value) in m.fields() {
        field_desc(entity, name)?.check(value)?;
    }
    for (name, _) in m.added_edges() {
        edge_desc(entity, name)?;
    }
    for f in &entity.fields {
        if f.optional || entity.edge_of_field(&f.name).is_some() {
            continue;
        }
        if m.field(&f.name).is_none() {
            return Err(GraphSqlError::validation(
                &f.name,
                format!("missing required field \"{}.{}\"", entity.name, f.name),
            ));
        }
    }
    if let IdDescriptor::Supplied { column, .. } = &entity.id {
        if m.id().is_none_or(Value::is_null) {
            return Err(GraphSqlError::validation(
                column,
                format!("missing required field \"{}.{column}\"", entity.name),
            ));
        }
    }
    for e in &entity.edges {
        if e.required && edge_ids(e, m).is_empty() {
            return Err(GraphSqlError::validation(
                &e.name,
                format!("missing required edge \"{}.{}\"", entity.name, e.name),
            ));
        }
    }
    Ok(())
}

fn create_spec(schema: &Schema, m: &Mutation) -> Result<CreateSpec, GraphSqlError> {
    let entity = schema.get(m.entity())?;
    let id = match &entity.id {
        IdDescriptor::Surrogate { column, ty } | IdDescriptor::Supplied { column, ty, .. } => {
            let value = m.id().cloned().unwrap_or(Value::Null);
            Some(FieldSpec::with_value(column.clone(), *ty, value))
        }
        IdDescriptor::Composite(_) => None,
    };
    let mut spec = CreateSpec::new(&entity.table, id);
    for (name, value) in m.fields() {
        if entity.edge_of_field(name).is_some() {
            continue;
        }
        let f = field_desc(entity, name)?;
        spec.set_field(&f.column, f.ty, value.clone());
    }
    for e in &entity.edges {
        let ids = edge_ids(e, m);
        if ids.is_empty() {
            continue;
        }
        let template = schema.edge_template(&entity.name, &e.name)?;
        spec.edges
            .push(schema.edge_spec(&entity.name, &e.name)?.nodes(ids).fields(template));
    }
    spec.on_conflict = m.conflict_options().to_vec();
    Ok(spec)
}

/// The node as created: every column, with the key filled in.
fn created_record(schema: &Schema, m: &Mutation, id: Value) -> Result<Record, GraphSqlError> {
    let entity = schema.get(m.entity())?;
    let node = schema.node_spec(&entity.name)?;
    let mut values: IndexMap<&str, Value> = IndexMap::new();
    for (name, value) in m.fields() {
        if let Some(f) = entity.field_desc(name) {
            values.insert(f.column.as_str(), value.clone());
        }
    }
    for e in &entity.edges {
        if schema.edge_spec(&entity.name, &e.name)?.sets_own_column() {
            if let Some(first) = edge_ids(e, m).into_iter().next() {
                values.insert(e.columns[0].as_str(), first);
            }
        }
    }
    let id_column = node.id.single().map(|f| f.column.clone());
    let row = node
        .columns
        .iter()
        .map(|f| {
            if id_column.as_deref() == Some(f.column.as_str()) {
                id.clone()
            } else {
                values.get(f.column.as_str()).cloned().unwrap_or(Value::Null)
            }
        })
        .collect();
    Ok(to_record(&entity.name, &node, row))
}

/// Creation of one entity.
pub struct Create<'c> {
    ctx: Ctx<'c>,
    mutation: Mutation,
}

impl<'c> Create<'c> {
    fn new(ctx: Ctx<'c>, entity: &str) -> Self {
        Self {
            ctx,
            mutation: Mutation::new(Op::CREATE, entity),
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.mutation.set_field(field, value);
        self
    }

    /// Sets the key of an entity whose key is supplied by the caller.
    pub fn set_id(mut self, id: impl Into<Value>) -> Self {
        self.mutation.set_id(id);
        self
    }

    pub fn add_edge<I, V>(mut self, edge: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.mutation
            .add_edge_ids(edge, ids.into_iter().map(Into::into));
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn on_conflict(mut self, options: impl IntoIterator<Item = ConflictOption>) -> Self {
        self.mutation.on_conflict(options);
        self
    }

    /// Conflict target for an upsert.
    pub fn on_conflict_columns(self, columns: &[&str]) -> Self {
        self.on_conflict([ConflictOption::columns(columns.iter().copied())])
    }

    /// On conflict, stores the proposed values of the mutable columns.
    pub fn update_new_values(self) -> Self {
        let options = match self.ctx.schema.get(self.mutation.entity()) {
            Ok(entity) => update_new_values(entity).to_vec(),
            Err(_) => vec![ConflictOption::ResolveWithNewValues],
        };
        self.on_conflict(options)
    }

    /// On conflict, keeps the stored row as is (still reporting its key
    /// where the backend returns it).
    pub fn ignore(self) -> Self {
        self.on_conflict([ConflictOption::ResolveWithIgnore])
    }

    pub fn do_nothing(self) -> Self {
        self.on_conflict([ConflictOption::DoNothing])
    }

    /// On conflict, applies custom assignments.
    pub fn update(self, f: impl Fn(&mut UpdateSet) + Send + Sync + 'static) -> Self {
        self.on_conflict([ConflictOption::resolve_with(f)])
    }

    /// Creates the entity and returns it with its key. A `do_nothing`
    /// upsert that hit a conflict returns a `Null` key.
    pub fn save(mut self) -> Result<Record, GraphSqlError> {
        let ctx = self.ctx;
        let entity = ctx.schema.get(self.mutation.entity())?;
        apply_create_defaults(entity, &mut self.mutation);
        let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            execute(m, |m| {
                check_create(ctx.schema, m)?;
                let spec = create_spec(ctx.schema, m)?;
                let id = create_node(ctx.driver, &spec)?;
                if !id.is_null() {
                    m.set_id(id.clone());
                }
                created_record(ctx.schema, m, id).map(MutationOutput::Record)
            })
        });
        let chain = ctx.hooks.compose(&entity.name, Box::new(terminal))?;
        chain.mutate(&mut self.mutation)?.into_record()
    }

    pub fn id(self) -> Result<Value, GraphSqlError> {
        self.save().map(|r| r.id)
    }

    pub fn exec(self) -> Result<(), GraphSqlError> {
        self.save().map(|_| ())
    }
}

/// Creation of many entities of one type in a single INSERT.
///
/// Every row runs its own hook chain. Row `i` calls into row `i + 1` before
/// finishing, and the last row executes the batch, so every check of every
/// row has passed before anything reaches the store.
pub struct CreateBulk<'c> {
    ctx: Ctx<'c>,
    builders: Vec<Create<'c>>,
    conflict: Vec<ConflictOption>,
}

impl<'c> CreateBulk<'c> {
    fn new(ctx: Ctx<'c>, builders: Vec<Create<'c>>) -> Self {
        Self {
            ctx,
            builders,
            conflict: Vec::new(),
        }
    }

    pub fn on_conflict(mut self, options: impl IntoIterator<Item = ConflictOption>) -> Self {
        self.conflict.extend(options);
        self
    }

    pub fn on_conflict_columns(self, columns: &[&str]) -> Self {
        self.on_conflict([ConflictOption::columns(columns.iter().copied())])
    }

    pub fn update_new_values(self) -> Self {
        let entity = self.builders.first().map(|b| b.mutation.entity().to_string());
        let options = match entity.as_deref().map(|e| self.ctx.schema.get(e)) {
            Some(Ok(entity)) => update_new_values(entity).to_vec(),
            _ => vec![ConflictOption::ResolveWithNewValues],
        };
        self.on_conflict(options)
    }

    pub fn ignore(self) -> Self {
        self.on_conflict([ConflictOption::ResolveWithIgnore])
    }

    pub fn do_nothing(self) -> Self {
        self.on_conflict([ConflictOption::DoNothing])
    }

    pub fn update(self, f: impl Fn(&mut UpdateSet) + Send + Sync + 'static) -> Self {
        self.on_conflict([ConflictOption::resolve_with(f)])
    }

    pub fn save(self) -> Result<Vec<Record>, GraphSqlError> {
        let ctx = self.ctx;
        let Some(first) = self.builders.first() else {
            return Ok(Vec::new());
        };
        let entity = ctx.schema.get(first.mutation.entity())?;
        let mut mutations = Vec::with_capacity(self.builders.len());
        for builder in self.builders {
            if builder.mutation.entity() != entity.name {
                return Err(GraphSqlError::invalid_spec(format!(
                    "bulk create mixes entities {:?} and {:?}",
                    entity.name,
                    builder.mutation.entity()
                )));
            }
            let mut m = builder.mutation;
            apply_create_defaults(entity, &mut m);
            mutations.push(RefCell::new(m));
        }
        let n = mutations.len();
        let specs: RefCell<Vec<Option<CreateSpec>>> = RefCell::new(vec![None; n]);
        let ids: RefCell<Vec<Value>> = RefCell::new(Vec::new());
        let records: RefCell<Vec<Option<Record>>> = RefCell::new(vec![None; n]);
        let conflict = self.conflict;

        let (mutations_ref, specs_ref, ids_ref, records_ref, conflict_ref) =
            (&mutations, &specs, &ids, &records, &conflict);
        let mut next: Option<BoxMutator<'_>> = None;
        for i in (0..n).rev() {
            let following = next.take();
            let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
                execute(m, |m| {
                    check_create(ctx.schema, m)?;
                    specs_ref.borrow_mut()[i] = Some(create_spec(ctx.schema, m)?);
                    match &following {
                        Some(following) => {
                            following.mutate(&mut mutations_ref[i + 1].borrow_mut())?;
                        }
                        None => {
                            let nodes = specs_ref
                                .borrow_mut()
                                .drain(..)
                                .collect::<Option<Vec<_>>>()
                                .ok_or_else(|| {
                                    GraphSqlError::inconsistent("bulk row skipped its terminal step")
                                })?;
                            let batch = BatchCreateSpec {
                                nodes,
                                on_conflict: conflict_ref.clone(),
                            };
                            *ids_ref.borrow_mut() = batch_create(ctx.driver, &batch)?;
                        }
                    }
                    let id = ids_ref.borrow().get(i).cloned().unwrap_or(Value::Null);
                    if !id.is_null() {
                        m.set_id(id.clone());
                    }
                    let record = created_record(ctx.schema, m, id)?;
                    records_ref.borrow_mut()[i] = Some(record.clone());
                    Ok(MutationOutput::Record(record))
                })
            });
            next = Some(ctx.hooks.compose(&entity.name, Box::new(terminal))?);
        }
        if let Some(chain) = next {
            chain.mutate(&mut mutations[0].borrow_mut())?;
        }
        records
            .take()
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| GraphSqlError::inconsistent(format!("bulk row {i} was not created")))
            })
            .collect()
    }
}

fn apply_update_defaults(entity: &EntitySchema, m: &mut Mutation) {
    for f in &entity.fields {
        if m.field(&f.name).is_none() && !m.field_cleared(&f.name) {
            if let Some(default) = &f.update_default {
                m.set_field(&f.name, default.resolve());
            }
        }
    }
}

/// Pre-flight checks of an update: writable fields, numeric adds, nillable
/// clears, and no required unique edge left without a neighbor.
fn check_update(schema: &Schema, m: &Mutation) -> Result<(), GraphSqlError> {
    let entity = schema.get(m.entity())?;
    for (name, value) in m.fields() {
        let f = field_desc(entity, name)?;
        if f.immutable {
            return Err(GraphSqlError::validation(
                name,
                format!("field \"{}.{name}\" is immutable", entity.name),
            ));
        }
        f.check(value)?;
    }
    for (name, _) in m.added_fields() {
        let f = field_desc(entity, name)?;
        if !f.ty.numeric() {
            return Err(GraphSqlError::invalid_spec(format!(
                "cannot add to non-numeric field \"{}.{name}\"",
                entity.name
            )));
        }
    }
    for name in m.cleared_fields() {
        let f = field_desc(entity, name)?;
        if !f.nillable {
            return Err(GraphSqlError::validation(
                name,
                format!("cannot clear non-nillable field \"{}.{name}\"", entity.name),
            ));
        }
    }
    for (name, _) in m.added_edges().chain(m.removed_edges()) {
        edge_desc(entity, name)?;
    }
    for name in m.cleared_edges() {
        let e = edge_desc(entity, name)?;
        if e.required && e.unique() && edge_ids(e, m).is_empty() {
            return Err(GraphSqlError::validation(
                name,
                format!("clearing a required unique edge \"{}.{name}\"", entity.name),
            ));
        }
    }
    Ok(())
}

fn update_spec(schema: &Schema, m: &Mutation, node: NodeSpec) -> Result<UpdateSpec, GraphSqlError> {
    let entity = schema.get(m.entity())?;
    let mut spec = UpdateSpec::new(node);
    for (name, value) in m.fields() {
        if entity.edge_of_field(name).is_some() {
            continue;
        }
        let f = field_desc(entity, name)?;
        spec.set_field(&f.column, f.ty, value.clone());
    }
    for (name, value) in m.added_fields() {
        let f = field_desc(entity, name)?;
        spec.add_field(&f.column, f.ty, value.clone());
    }
    for name in m.cleared_fields() {
        let f = field_desc(entity, name)?;
        match entity.edge_of_field(name) {
            Some(e) => spec.edges.clear.push(schema.edge_spec(&entity.name, &e.name)?),
            None => spec.clear_field(&f.column, f.ty),
        }
    }
    for name in m.cleared_edges() {
        spec.edges.clear.push(schema.edge_spec(&entity.name, name)?);
    }
    for (name, ids) in m.removed_edges() {
        spec.edges
            .remove
            .push(schema.edge_spec(&entity.name, name)?.nodes(ids.to_vec()));
    }
    for e in &entity.edges {
        let ids = edge_ids(e, m);
        if ids.is_empty() {
            continue;
        }
        let template = schema.edge_template(&entity.name, &e.name)?;
        spec.edges
            .add
            .push(schema.edge_spec(&entity.name, &e.name)?.nodes(ids).fields(template));
    }
    spec.predicates = m.predicates().to_vec();
    Ok(spec)
}

macro_rules! update_setters {
    () => {
        pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
            self.mutation.set_field(field, value);
            self
        }

        /// `field = field + value`
        pub fn add(mut self, field: &str, value: impl Into<Value>) -> Self {
            self.mutation.add_field(field, value);
            self
        }

        pub fn clear(mut self, field: &str) -> Self {
            self.mutation.clear_field(field);
            self
        }

        pub fn add_edge<I, V>(mut self, edge: &str, ids: I) -> Self
        where
            I: IntoIterator<Item = V>,
            V: Into<Value>,
        {
            self.mutation
                .add_edge_ids(edge, ids.into_iter().map(Into::into));
            self
        }

        pub fn remove_edge<I, V>(mut self, edge: &str, ids: I) -> Self
        where
            I: IntoIterator<Item = V>,
            V: Into<Value>,
        {
            self.mutation
                .remove_edge_ids(edge, ids.into_iter().map(Into::into));
            self
        }

        pub fn clear_edge(mut self, edge: &str) -> Self {
            self.mutation.clear_edge(edge);
            self
        }

        pub fn where_(mut self, pred: Predicate) -> Self {
            self.mutation.where_(pred);
            self
        }

        pub fn mutation(&self) -> &Mutation {
            &self.mutation
        }
    };
}

/// Update of one entity by key.
pub struct UpdateOne<'c> {
    ctx: Ctx<'c>,
    key: Vec<Value>,
    mutation: Mutation,
}

impl<'c> UpdateOne<'c> {
    fn new(ctx: Ctx<'c>, entity: &str, key: Vec<Value>) -> Self {
        let mut mutation = Mutation::new(Op::UPDATE_ONE, entity);
        if let [id] = key.as_slice() {
            mutation.set_id(id.clone());
        }
        Self { ctx, key, mutation }
    }

    update_setters!();

    /// Applies the update and returns the entity as stored afterwards.
    /// Fails with `NotFound` when no row matches the key and predicates.
    pub fn save(mut self) -> Result<Record, GraphSqlError> {
        let ctx = self.ctx;
        let entity = ctx.schema.get(self.mutation.entity())?;
        apply_update_defaults(entity, &mut self.mutation);
        let key = self.key;
        let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            execute(m, |m| {
                check_update(ctx.schema, m)?;
                let key = match m.id() {
                    Some(id) if key.len() == 1 => vec![id.clone()],
                    _ => key.clone(),
                };
                let node = key_spec(ctx.schema, m.entity(), &key)?;
                let mut spec = update_spec(ctx.schema, m, node)?;
                spec.returning = true;
                let row = update_node(ctx.driver, &spec)?
                    .ok_or_else(|| GraphSqlError::inconsistent("update returned no row"))?;
                Ok(MutationOutput::Record(to_record(m.entity(), &spec.node, row)))
            })
        });
        let chain = ctx.hooks.compose(&entity.name, Box::new(terminal))?;
        chain.mutate(&mut self.mutation)?.into_record()
    }

    pub fn exec(self) -> Result<(), GraphSqlError> {
        self.save().map(|_| ())
    }
}

/// Update of every entity matching the predicates.
pub struct Update<'c> {
    ctx: Ctx<'c>,
    mutation: Mutation,
}

impl<'c> Update<'c> {
    fn new(ctx: Ctx<'c>, entity: &str) -> Self {
        Self {
            ctx,
            mutation: Mutation::new(Op::UPDATE, entity),
        }
    }

    update_setters!();

    /// Applies the update and returns how many entities it touched.
    pub fn save(mut self) -> Result<usize, GraphSqlError> {
        let ctx = self.ctx;
        let entity = ctx.schema.get(self.mutation.entity())?;
        apply_update_defaults(entity, &mut self.mutation);
        let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            execute(m, |m| {
                check_update(ctx.schema, m)?;
                let node = ctx.schema.node_spec(m.entity())?;
                let spec = update_spec(ctx.schema, m, node)?;
                update_nodes(ctx.driver, &spec).map(MutationOutput::Affected)
            })
        });
        let chain = ctx.hooks.compose(&entity.name, Box::new(terminal))?;
        chain.mutate(&mut self.mutation)?.into_affected()
    }
}

/// Deletion of one entity by key.
pub struct DeleteOne<'c> {
    ctx: Ctx<'c>,
    key: Vec<Value>,
    mutation: Mutation,
}

impl<'c> DeleteOne<'c> {
    fn new(ctx: Ctx<'c>, entity: &str, key: Vec<Value>) -> Self {
        let mut mutation = Mutation::new(Op::DELETE_ONE, entity);
        if let [id] = key.as_slice() {
            mutation.set_id(id.clone());
        }
        Self { ctx, key, mutation }
    }

    pub fn where_(mut self, pred: Predicate) -> Self {
        self.mutation.where_(pred);
        self
    }

    /// Deletes the entity; `NotFound` when nothing matched.
    pub fn exec(mut self) -> Result<(), GraphSqlError> {
        let ctx = self.ctx;
        let key = self.key;
        let entity = ctx.schema.get(self.mutation.entity())?.name.clone();
        let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            execute(m, |m| {
                let node = ctx.schema.node_spec(m.entity())?;
                let mut spec = DeleteSpec::new(node);
                spec.key = Some(key.clone());
                spec.predicates = m.predicates().to_vec();
                match delete_nodes(ctx.driver, &spec)? {
                    0 => Err(GraphSqlError::not_found(format!(
                        "{} with key ({})",
                        m.entity(),
                        key.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    ))),
                    n => Ok(MutationOutput::Affected(n)),
                }
            })
        });
        let chain = ctx.hooks.compose(&entity, Box::new(terminal))?;
        chain.mutate(&mut self.mutation).map(|_| ())
    }
}

/// Deletion of every entity matching the predicates.
pub struct Delete<'c> {
    ctx: Ctx<'c>,
    mutation: Mutation,
}

impl<'c> Delete<'c> {
    fn new(ctx: Ctx<'c>, entity: &str) -> Self {
        Self {
            ctx,
            mutation: Mutation::new(Op::DELETE, entity),
        }
    }

    pub fn where_(mut self, pred: Predicate) -> Self {
        self.mutation.where_(pred);
        self
    }

    pub fn exec(mut self) -> Result<usize, GraphSqlError> {
        let ctx = self.ctx;
        let entity = ctx.schema.get(self.mutation.entity())?.name.clone();
        let terminal = MutateFn(move |m: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            execute(m, |m| {
                let mut spec = DeleteSpec::new(ctx.schema.node_spec(m.entity())?);
                spec.predicates = m.predicates().to_vec();
                delete_nodes(ctx.driver, &spec).map(MutationOutput::Affected)
            })
        });
        let chain = ctx.hooks.compose(&entity, Box::new(terminal))?;
        chain.mutate(&mut self.mutation)?.into_affected()
    }
}

/// A read of one entity type, with optional traversal source and eager
/// loads.
pub struct Query<'c> {
    ctx: Ctx<'c>,
    entity: String,
    predicates: Vec<Predicate>,
    order: Vec<Predicate>,
    limit: Option<u64>,
    offset: Option<u64>,
    unique: bool,
    select: Option<Vec<String>>,
    from: Option<Selector>,
    with: Vec<(String, Query<'c>)>,
    err: Option<GraphSqlError>,
}

impl<'c> Query<'c> {
    fn new(ctx: Ctx<'c>, entity: &str) -> Self {
        Self {
            ctx,
            entity: entity.to_string(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            unique: false,
            select: None,
            from: None,
            with: Vec::new(),
            err: None,
        }
    }

    pub fn where_(mut self, pred: Predicate) -> Self {
        self.predicates.push(pred);
        self
    }

    pub fn order(mut self, order: Predicate) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Restricts the loaded fields. The key of single-key entities is
    /// always loaded.
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Eager-loads `edge` on every result. `configure` shapes the neighbor
    /// query and may request nested loads.
    pub fn with_edge(mut self, edge: &str, configure: impl FnOnce(Query<'c>) -> Query<'c>) -> Self {
        match self.ctx.schema.edge(&self.entity, edge) {
            Ok(desc) => {
                let sub = configure(Query::new(self.ctx, &desc.target));
                self.with.push((edge.to_string(), sub));
            }
            Err(err) => {
                self.err.get_or_insert(err);
            }
        }
        self
    }

    /// Continues the traversal across `edge`: a query of the neighbors of
    /// every entity this query matches.
    pub fn query_edge(self, edge: &str) -> Result<Query<'c>, GraphSqlError> {
        let ctx = self.ctx;
        let desc = ctx.schema.edge(&self.entity, edge)?;
        let spec = self.spec()?;
        let to = ctx.schema.node_spec(&desc.target)?;
        let step = Step::new(&spec.node, &ctx.schema.edge_spec(&self.entity, edge)?, &to)?;
        let mut next = Query::new(ctx, &desc.target);
        next.from = Some(step.set_neighbors(crate::graph::compile_query(&spec)?));
        Ok(next)
    }

    fn spec(&self) -> Result<QuerySpec, GraphSqlError> {
        if let Some(err) = &self.err {
            return Err(GraphSqlError::invalid_spec(err.to_string()));
        }
        let entity = self.ctx.schema.get(&self.entity)?;
        let mut node = self.ctx.schema.node_spec(&self.entity)?;
        if let Some(fields) = &self.select {
            let columns: Vec<String> = fields
                .iter()
                .map(|f| entity.field_desc(f).map_or_else(|| f.clone(), |d| d.column.clone()))
                .collect();
            node = node.project(&columns)?;
        }
        for (name, _) in &self.with {
            let edge = self.ctx.schema.edge_spec(&self.entity, name)?;
            if edge.sets_own_column() {
                node = node.column(edge.fk_column()?, edge.target.id.ty);
            }
        }
        let mut spec = QuerySpec::new(node);
        spec.from = self.from.clone();
        spec.limit = self.limit;
        spec.offset = self.offset;
        spec.unique = self.unique;
        spec.predicates = self.predicates.clone();
        spec.order = self.order.clone();
        Ok(spec)
    }

    fn run(&self, spec: &mut QuerySpec, count: bool) -> Result<QueryOutput, GraphSqlError> {
        let driver = self.ctx.driver;
        let terminal = QueryFn(move |entity: &str, spec: &mut QuerySpec| -> Result<QueryOutput, GraphSqlError> {
            if count {
                return count_nodes(driver, spec).map(QueryOutput::Count);
            }
            let rows = query_nodes(driver, spec)?;
            Ok(QueryOutput::Records(
                rows.rows
                    .into_iter()
                    .map(|values| to_record(entity, &spec.node, values))
                    .collect(),
            ))
        });
        intercept(self.ctx.interceptors, Box::new(terminal)).query(&self.entity, spec)
    }

    pub fn all(self) -> Result<Vec<Record>, GraphSqlError> {
        let mut spec = self.spec()?;
        let mut records = match self.run(&mut spec, false)? {
            QueryOutput::Records(records) => records,
            QueryOutput::Count(_) => {
                return Err(GraphSqlError::inconsistent("interceptor returned a count for a record query"));
            }
        };
        for (name, sub) in self.with {
            eager_load(self.ctx, &self.entity, &spec.node, &mut records, &name, sub)?;
        }
        Ok(records)
    }

    /// The first result; `NotFound` when there is none.
    pub fn first(self) -> Result<Record, GraphSqlError> {
        let entity = self.entity.clone();
        self.limit(1)
            .all()?
            .into_iter()
            .next()
            .ok_or_else(|| GraphSqlError::not_found(entity))
    }

    /// The only result; `NotFound` when there is none, `NotSingular` when
    /// there are several.
    pub fn only(self) -> Result<Record, GraphSqlError> {
        let entity = self.entity.clone();
        let mut records = self.limit(2).all()?;
        match records.len() {
            0 => Err(GraphSqlError::not_found(entity)),
            1 => Ok(records.remove(0)),
            _ => Err(GraphSqlError::not_singular(entity)),
        }
    }

    pub fn ids(mut self) -> Result<Vec<Value>, GraphSqlError> {
        let entity = self.ctx.schema.get(&self.entity)?;
        if entity.is_composite() {
            return Err(GraphSqlError::invalid_spec(format!(
                "entity {:?} has a composite key",
                entity.name
            )));
        }
        self.select = Some(Vec::new());
        self.with.clear();
        Ok(self.all()?.into_iter().map(|r| r.id).collect())
    }

    pub fn count(self) -> Result<usize, GraphSqlError> {
        let mut spec = self.spec()?;
        match self.run(&mut spec, true)? {
            QueryOutput::Count(n) => Ok(n),
            QueryOutput::Records(records) => Ok(records.len()),
        }
    }

    pub fn exist(self) -> Result<bool, GraphSqlError> {
        if self.ctx.schema.get(&self.entity)?.is_composite() {
            return self.count().map(|n| n > 0);
        }
        self.limit(1).ids().map(|ids| !ids.is_empty())
    }
}

/// Loads `edge` onto `parents`, then the nested loads of `sub` onto the
/// neighbors. Parents are only touched once every level has loaded.
fn eager_load(
    ctx: Ctx<'_>,
    entity: &str,
    owner: &NodeSpec,
    parents: &mut [Record],
    edge: &str,
    mut sub: Query<'_>,
) -> Result<(), GraphSqlError> {
    let spec = ctx.schema.edge_spec(entity, edge)?;
    let target = sub.entity.clone();
    let nested = std::mem::take(&mut sub.with);
    let mut query = sub.spec()?;
    // Nested loads need the neighbors' own foreign keys.
    for (name, _) in &nested {
        let e = ctx.schema.edge_spec(&target, name)?;
        if e.sets_own_column() {
            query.node = query.node.column(e.fk_column()?, e.target.id.ty);
        }
    }
    let neighbor_node = query.node.clone();
    let mut loaded = load_edge(ctx.driver, owner, parents, &spec, query, |columns, values| {
        let id_column = neighbor_node.id.single().map(|f| f.column.as_str());
        let mut record = Record::new(&target, Value::Null);
        for (column, value) in columns.iter().zip(values) {
            if Some(column.as_str()) == id_column {
                record.id = value.clone();
            }
            record.fields.insert(column.clone(), value);
        }
        Ok(record)
    })?;
    for (name, subsub) in nested {
        eager_load(ctx, &target, &neighbor_node, loaded.neighbors_mut(), &name, subsub)?;
    }
    for parent in parents.iter_mut() {
        parent.set_edge(edge, Vec::new());
    }
    loaded.assign(parents, |parent, neighbor| parent.push_edge(edge, neighbor.clone()))
}
