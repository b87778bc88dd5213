//! In-memory connection and driver for tests
//!
//! `MemoryConnection` implements the part of MongoDB's query semantics the
//! engine relies on: equality and comparison filters, inclusion and
//! exclusion projections, sort, limit, and the `$match`, `$project`,
//! `$group`, `$sort`, `$skip` and `$limit` aggregation stages. Documents
//! are yielded in insertion order unless sorted, and `$group` emits groups
//! in the order their key first appears.
//!
//! Usage:
//! ```ignore
//! let conn = MemoryConnection::new();
//! conn.insert(&dummy_collection(), dummy_documents());
//! let result = QueryExecutor::new().execute(&conn.into_dyn(), &dummy_collection(), &options).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mongoz_core::{
    CollectionRef, Connection, ConnectionProfile, DatabaseDriver, FindRequest, ID_FIELD,
    MongozError, Result,
};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

/// The collection the fixtures live in
pub fn dummy_collection() -> CollectionRef {
    CollectionRef::new("test", "dummyCollection")
}

/// Five priced documents with integer ids 1 to 5
pub fn dummy_documents() -> Vec<Document> {
    vec![
        bson::doc! { "_id": 1, "label": "toto", "price": 9 },
        bson::doc! { "_id": 2, "label": "tutu", "price": 15 },
        bson::doc! { "_id": 3, "label": "tata", "price": 15 },
        bson::doc! { "_id": 4, "label": "tete", "price": 20 },
        bson::doc! { "_id": 5, "label": "tata", "price": 10 },
    ]
}

/// A failure every operation reports until cleared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Connection(String),
    Query(String),
}

impl InjectedFailure {
    fn to_error(&self) -> MongozError {
        match self {
            Self::Connection(message) => MongozError::Connection(message.clone()),
            Self::Query(message) => MongozError::Query(message.clone()),
        }
    }
}

/// Collections shared by every connection opened on it
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<(String, String), Vec<Document>>>,
    failure: Mutex<Option<InjectedFailure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents, creating the collection if needed.
    ///
    /// Documents without an `_id` get a fresh object id as their first field.
    pub fn insert(&self, collection: &CollectionRef, documents: Vec<Document>) {
        let mut collections = self.collections.write();
        let stored = collections.entry(key(collection)).or_default();
        for document in documents {
            if document.contains_key(ID_FIELD) {
                stored.push(document);
            } else {
                let mut with_id = bson::doc! { ID_FIELD: ObjectId::new() };
                with_id.extend(document);
                stored.push(with_id);
            }
        }
    }

    /// Snapshot of a collection in store order
    pub fn documents(&self, collection: &CollectionRef) -> Vec<Document> {
        self.collections
            .read()
            .get(&key(collection))
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_with(&self, failure: InjectedFailure) {
        *self.failure.lock() = Some(failure);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    fn check_failure(&self) -> Result<()> {
        match &*self.failure.lock() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

fn key(collection: &CollectionRef) -> (String, String) {
    (collection.database.clone(), collection.name.clone())
}

/// A `Connection` over a `MemoryStore`
#[derive(Debug)]
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// A connection over its own empty store
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn insert(&self, collection: &CollectionRef, documents: Vec<Document>) {
        self.store.insert(collection, documents);
    }

    pub fn documents(&self, collection: &CollectionRef) -> Vec<Document> {
        self.store.documents(collection)
    }

    pub fn into_dyn(self) -> Arc<dyn Connection> {
        Arc::new(self)
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(MongozError::Connection("Connection is closed".to_string()));
        }
        self.store.check_failure()
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn driver_name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn find(&self, collection: &CollectionRef, request: &FindRequest) -> Result<Vec<Document>> {
        self.check()?;
        let mut rows = filter_documents(self.store.documents(collection), &request.filter)?;
        if let Some(sort) = &request.sort {
            sort_documents(&mut rows, sort)?;
        }
        if let Some(limit) = request.limit {
            rows.truncate(limit.unsigned_abs() as usize);
        }
        match &request.projection {
            Some(projection) => rows.iter().map(|row| project(row, projection)).collect(),
            None => Ok(rows),
        }
    }

    async fn aggregate(
        &self,
        collection: &CollectionRef,
        pipeline: &[Document],
    ) -> Result<Vec<Document>> {
        self.check()?;
        let mut rows = self.store.documents(collection);
        for stage in pipeline {
            rows = apply_stage(rows, stage)?;
        }
        Ok(rows)
    }

    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.check()?;
        Ok(filter_documents(self.store.documents(collection), filter)?
            .into_iter()
            .next())
    }

    async fn replace_one(
        &self,
        collection: &CollectionRef,
        id: &Bson,
        replacement: &Document,
    ) -> Result<u64> {
        self.check()?;
        let mut collections = self.store.collections.write();
        let Some(rows) = collections.get_mut(&key(collection)) else {
            return Ok(0);
        };
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.get(ID_FIELD).is_some_and(|v| values_equal(v, id)))
        else {
            return Ok(0);
        };

        let mut stored = bson::doc! { ID_FIELD: id.clone() };
        stored.extend(
            replacement
                .iter()
                .filter(|(k, _)| k.as_str() != ID_FIELD)
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        *row = stored;
        Ok(1)
    }

    async fn delete_one(&self, collection: &CollectionRef, id: &Bson) -> Result<u64> {
        self.check()?;
        let mut collections = self.store.collections.write();
        let Some(rows) = collections.get_mut(&key(collection)) else {
            return Ok(0);
        };
        match rows
            .iter()
            .position(|row| row.get(ID_FIELD).is_some_and(|v| values_equal(v, id)))
        {
            Some(index) => {
                rows.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_database_names(&self) -> Result<Vec<String>> {
        self.check()?;
        let mut names: Vec<String> = self
            .store
            .collections
            .read()
            .keys()
            .map(|(database, _)| database.clone())
            .collect();
        names.dedup();
        Ok(names)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .store
            .collections
            .read()
            .keys()
            .filter(|(db, _)| db == database)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }
}

/// A `DatabaseDriver` opening `MemoryConnection`s over one shared store
#[derive(Debug, Default)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
    opened: Mutex<Vec<Arc<MemoryConnection>>>,
    refusal: Mutex<Option<InjectedFailure>>,
    connect_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            ..Self::default()
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Make every following `connect` fail
    pub fn refuse_connections(&self, failure: InjectedFailure) {
        *self.refusal.lock() = Some(failure);
    }

    /// Make every following `connect` wait before answering
    pub fn delay_connections(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(AtomicOrdering::SeqCst)
    }

    /// Every connection handed out, in order
    pub fn opened(&self) -> Vec<Arc<MemoryConnection>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Connection>> {
        profile.validate()?;
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.refusal.lock().clone() {
            return Err(failure.to_error());
        }

        let connection = Arc::new(MemoryConnection::with_store(self.store.clone()));
        self.opened.lock().push(connection.clone());
        self.connects.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(connection)
    }

    fn build_connection_string(&self, profile: &ConnectionProfile) -> Result<String> {
        let hosts: Vec<String> = profile
            .server_addresses()?
            .iter()
            .map(ToString::to_string)
            .collect();
        Ok(format!("memory://{}/", hosts.join(",")))
    }
}

// ============================================================================
// Query semantics
// ============================================================================

fn filter_documents(rows: Vec<Document>, filter: &Document) -> Result<Vec<Document>> {
    let mut matched = Vec::new();
    for row in rows {
        if matches(&row, filter)? {
            matched.push(row);
        }
    }
    Ok(matched)
}

fn matches(row: &Document, filter: &Document) -> Result<bool> {
    for (field, condition) in filter {
        let ok = match field.as_str() {
            "$and" => all_clauses(condition)?
                .iter()
                .map(|clause| matches(row, clause))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .all(|m| m),
            "$or" => all_clauses(condition)?
                .iter()
                .map(|clause| matches(row, clause))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .any(|m| m),
            op if op.starts_with('$') => {
                return Err(MongozError::Query(format!(
                    "unknown top level operator: {}",
                    op
                )));
            }
            _ => field_matches(lookup(row, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_clauses(condition: &Bson) -> Result<Vec<&Document>> {
    let Bson::Array(items) = condition else {
        return Err(MongozError::Query("$and/$or/$nor must be a nonempty array".to_string()));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(MongozError::Query("$or/$and/$nor entries need to be full objects".to_string())),
        })
        .collect()
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => Some(ops),
        _ => None,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let Some(ops) = is_operator_document(condition) else {
        return Ok(equals_or_contains(value, condition));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_or_contains(value, arg),
            "$ne" => !equals_or_contains(value, arg),
            "$gt" => compares(value, arg, |o| o == Ordering::Greater),
            "$gte" => compares(value, arg, |o| o != Ordering::Less),
            "$lt" => compares(value, arg, |o| o == Ordering::Less),
            "$lte" => compares(value, arg, |o| o != Ordering::Greater),
            "$in" => in_list(value, arg)?,
            "$nin" => !in_list(value, arg)?,
            "$exists" => value.is_some() == truthy(arg),
            _ => return Err(MongozError::Query(format!("unknown operator: {}", op))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn compares(value: Option<&Bson>, arg: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, arg).is_some_and(&accept)),
        Some(value) => compare(value, arg).is_some_and(accept),
        None => false,
    }
}

fn in_list(value: Option<&Bson>, arg: &Bson) -> Result<bool> {
    let Bson::Array(candidates) = arg else {
        return Err(MongozError::Query("$in needs an array".to_string()));
    };
    Ok(candidates
        .iter()
        .any(|candidate| equals_or_contains(value, candidate)))
}

fn lookup<'a>(row: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).is_none_or(|n| n != 0.0),
    }
}

// Cross-type sort order: missing/null, numbers, strings, objects, arrays,
// binary, object ids, booleans, dates, the rest.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(_) => 9,
    }
}

fn sort_documents(rows: &mut [Document], sort: &Document) -> Result<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        let descending = match as_f64(direction) {
            Some(d) if d == 1.0 => false,
            Some(d) if d == -1.0 => true,
            _ => {
                return Err(MongozError::Query(format!(
                    "$sort key ordering must be 1 (for ascending) or -1 (for descending), got {}",
                    direction
                )));
            }
        };
        keys.push((field.as_str(), descending));
    }

    rows.sort_by(|a, b| {
        for (field, descending) in &keys {
            let (x, y) = (lookup(a, field), lookup(b, field));
            let order = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
            let order = if *descending { order.reverse() } else { order };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn project(row: &Document, projection: &Document) -> Result<Document> {
    let only_id = !projection.is_empty()
        && projection
            .iter()
            .all(|(field, spec)| field == ID_FIELD && truthy(spec));
    let inclusion = only_id
        || projection
            .iter()
            .any(|(field, spec)| field != ID_FIELD && (truthy(spec) || is_field_path(spec)));
    let exclude_id = projection.get(ID_FIELD).is_some_and(|spec| !truthy(spec));

    if !inclusion {
        let mut projected = row.clone();
        for (field, spec) in projection {
            if !truthy(spec) {
                projected.remove(field);
            }
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if !exclude_id {
        if let Some(id) = row.get(ID_FIELD) {
            projected.insert(ID_FIELD, id.clone());
        }
    }
    for (field, spec) in projection {
        if field == ID_FIELD {
            continue;
        }
        if let Some(path) = field_path(spec) {
            if let Some(value) = lookup(row, path) {
                projected.insert(field.clone(), value.clone());
            }
        } else if truthy(spec) {
            if let Some(value) = lookup(row, field) {
                projected.insert(field.clone(), value.clone());
            }
        } else {
            return Err(MongozError::Query(format!(
                "Cannot do exclusion on field {} in inclusion projection",
                field
            )));
        }
    }
    Ok(projected)
}

fn is_field_path(spec: &Bson) -> bool {
    field_path(spec).is_some()
}

fn field_path(spec: &Bson) -> Option<&str> {
    match spec {
        Bson::String(s) => s.strip_prefix('$'),
        _ => None,
    }
}

// ============================================================================
// Aggregation stages
// ============================================================================

fn apply_stage(rows: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(MongozError::Query(
            "A pipeline stage specification object must contain exactly one field.".to_string(),
        ));
    };

    match (name.as_str(), spec) {
        ("$match", Bson::Document(filter)) => filter_documents(rows, filter),
        ("$project", Bson::Document(projection)) => {
            rows.iter().map(|row| project(row, projection)).collect()
        }
        ("$sort", Bson::Document(sort)) => {
            let mut rows = rows;
            sort_documents(&mut rows, sort)?;
            Ok(rows)
        }
        ("$group", Bson::Document(group)) => group_documents(&rows, group),
        ("$limit", count) => Ok(rows.into_iter().take(stage_count(name, count)?).collect()),
        ("$skip", count) => Ok(rows.into_iter().skip(stage_count(name, count)?).collect()),
        (name, _) if !name.starts_with('$') || !KNOWN_STAGES.contains(&name) => Err(
            MongozError::Query(format!("Unrecognized pipeline stage name: '{}'", name)),
        ),
        (name, _) => Err(MongozError::Query(format!(
            "the {} stage specification must be an object",
            name
        ))),
    }
}

const KNOWN_STAGES: &[&str] = &["$match", "$project", "$sort", "$group", "$limit", "$skip"];

fn stage_count(name: &str, count: &Bson) -> Result<usize> {
    match as_f64(count) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(MongozError::Query(format!(
            "invalid argument to {} stage: {}",
            name, count
        ))),
    }
}

fn evaluate(row: &Document, expression: &Bson) -> Option<Bson> {
    match field_path(expression) {
        Some(path) => lookup(row, path).cloned(),
        None => Some(expression.clone()),
    }
}

fn group_documents(rows: &[Document], group: &Document) -> Result<Vec<Document>> {
    let key_expression = group.get(ID_FIELD).ok_or_else(|| {
        MongozError::Query("a group specification must include an _id".to_string())
    })?;

    let mut accumulators = Vec::new();
    for (field, spec) in group.iter().filter(|(field, _)| field.as_str() != ID_FIELD) {
        let Bson::Document(spec) = spec else {
            return Err(MongozError::Query(format!(
                "The field '{}' must be an accumulator object",
                field
            )));
        };
        let mut entries = spec.iter();
        let (Some((op, argument)), None) = (entries.next(), entries.next()) else {
            return Err(MongozError::Query(format!(
                "The field '{}' must specify one accumulator",
                field
            )));
        };
        if !matches!(op.as_str(), "$sum" | "$min" | "$max" | "$first" | "$last") {
            return Err(MongozError::Query(format!("unknown group operator '{}'", op)));
        }
        accumulators.push((field.clone(), op.clone(), argument.clone()));
    }

    // Groups keep the order in which their key first appears
    let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();
    for row in rows {
        let group_key = evaluate(row, key_expression).unwrap_or(Bson::Null);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &group_key)) {
            Some((_, members)) => members.push(row),
            None => groups.push((group_key, vec![row])),
        }
    }

    Ok(groups
        .into_iter()
        .map(|(group_key, members)| {
            let mut output = bson::doc! { ID_FIELD: group_key };
            for (field, op, argument) in &accumulators {
                let values = members.iter().filter_map(|row| evaluate(row, argument));
                output.insert(field.clone(), accumulate(op, values));
            }
            output
        })
        .collect())
}

fn accumulate(op: &str, mut values: impl Iterator<Item = Bson>) -> Bson {
    match op {
        "$sum" => sum(values),
        "$min" => values
            .filter(|v| !matches!(v, Bson::Null))
            .min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .unwrap_or(Bson::Null),
        "$max" => values
            .filter(|v| !matches!(v, Bson::Null))
            .max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .unwrap_or(Bson::Null),
        "$first" => values.next().unwrap_or(Bson::Null),
        _ => values.last().unwrap_or(Bson::Null),
    }
}

// Int32 while every input is Int32 and the total fits, Int64 for wider
// integers, Double once any input is a double. Non-numbers are skipped.
fn sum(values: impl Iterator<Item = Bson>) -> Bson {
    let mut total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut widest = 0u8;
    for value in values {
        match value {
            Bson::Int32(n) => {
                total = total.saturating_add(i64::from(n));
                float_total += f64::from(n);
            }
            Bson::Int64(n) => {
                total = total.saturating_add(n);
                float_total += n as f64;
                widest = widest.max(1);
            }
            Bson::Double(n) => {
                float_total += n;
                widest = 2;
            }
            _ => {}
        }
    }
    match widest {
        2 => Bson::Double(float_total),
        0 => match i32::try_from(total) {
            Ok(n) => Bson::Int32(n),
            Err(_) => Bson::Int64(total),
        },
        _ => Bson::Int64(total),
    }
}
