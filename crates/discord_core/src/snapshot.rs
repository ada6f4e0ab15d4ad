//! Cycle-safe snapshots of SDK object graphs.
//!
//! SDK objects point back at each other (a member knows its guild, the guild
//! lists its members) and carry 64-bit ids that a JSON number cannot hold
//! exactly. [`Graph`] models such data with `Arc`-shared containers;
//! [`snapshot`] flattens it into nested, acyclic JSON and [`restore`] rebuilds
//! the sharing.
//!
//! Transport form:
//! * containers are numbered in depth-first pre-order, starting at 0 for the root;
//! * the first visit of a container is written inline, every later visit as
//!   `{"$ref": n}`;
//! * object keys starting with `$` get one more `$` so they cannot be mistaken
//!   for a marker;
//! * integers outside ±(2^53 - 1) become decimal strings.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::SerializationError;

/// Largest integer a transport number carries without loss.
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

const REF_MARKER: &str = "$ref";

pub type GraphList = Arc<RwLock<Vec<Graph>>>;
pub type GraphMap = Arc<RwLock<BTreeMap<String, Graph>>>;

/// A possibly cyclic object graph. Cloning a container clones the `Arc`,
/// so clones share (and may point back at) the same node.
#[derive(Clone)]
pub enum Graph {
    Null,
    Bool(bool),
    Number(f64),
    /// Integers too large for a transport number, e.g. snowflake ids.
    BigInt(i128),
    Text(String),
    List(GraphList),
    Map(GraphMap),
}

impl Graph {
    pub fn list(items: Vec<Graph>) -> Graph {
        Graph::List(Arc::new(RwLock::new(items)))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Graph)>) -> Graph {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Graph::Map(Arc::new(RwLock::new(map)))
    }

    pub fn empty_map() -> Graph {
        Graph::map(Vec::<(String, Graph)>::new())
    }

    /// An integer, kept as a number when it is safe to do so.
    pub fn integer(value: i128) -> Graph {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
            Graph::Number(value as f64)
        } else {
            Graph::BigInt(value)
        }
    }

    /// Lift any serializable SDK object into a graph.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Graph, SerializationError> {
        Ok(Graph::from(serde_json::to_value(value)?))
    }

    /// Set a key on a map node. Returns false if this is not a map.
    pub fn insert(&self, key: impl Into<String>, value: Graph) -> bool {
        match self {
            Graph::Map(map) => {
                write(map).insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Append to a list node. Returns false if this is not a list.
    pub fn push(&self, value: Graph) -> bool {
        match self {
            Graph::List(list) => {
                write(list).push(value);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Graph> {
        match self {
            Graph::Map(map) => read(map).get(key).cloned(),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<Graph> {
        match self {
            Graph::List(list) => read(list).get(index).cloned(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Graph::List(list) => read(list).len(),
            Graph::Map(map) => read(map).len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Graph::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Graph::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Graph::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True when both are the very same container node.
    pub fn same_node(&self, other: &Graph) -> bool {
        match (self, other) {
            (Graph::List(a), Graph::List(b)) => Arc::ptr_eq(a, b),
            (Graph::Map(a), Graph::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn node_address(&self) -> Option<usize> {
        match self {
            Graph::List(list) => Some(Arc::as_ptr(list) as *const () as usize),
            Graph::Map(map) => Some(Arc::as_ptr(map) as *const () as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match encode(self) {
            Ok(value) => write!(f, "Graph({value})"),
            Err(err) => write!(f, "Graph(<{err}>)"),
        }
    }
}

impl From<Value> for Graph {
    fn from(value: Value) -> Graph {
        match value {
            Value::Null => Graph::Null,
            Value::Bool(b) => Graph::Bool(b),
            Value::Number(n) => number_to_graph(&n),
            Value::String(s) => Graph::Text(s),
            Value::Array(items) => Graph::list(items.into_iter().map(Graph::from).collect()),
            Value::Object(map) => Graph::map(map.into_iter().map(|(k, v)| (k, Graph::from(v)))),
        }
    }
}

impl From<&str> for Graph {
    fn from(value: &str) -> Graph {
        Graph::Text(value.to_string())
    }
}

impl From<String> for Graph {
    fn from(value: String) -> Graph {
        Graph::Text(value)
    }
}

impl From<bool> for Graph {
    fn from(value: bool) -> Graph {
        Graph::Bool(value)
    }
}

impl From<i64> for Graph {
    fn from(value: i64) -> Graph {
        Graph::integer(value as i128)
    }
}

impl From<u64> for Graph {
    fn from(value: u64) -> Graph {
        Graph::integer(value as i128)
    }
}

impl From<f64> for Graph {
    fn from(value: f64) -> Graph {
        Graph::Number(value)
    }
}

/// Flatten `value` into acyclic transport JSON. `None` stays `None`.
pub fn snapshot(value: Option<&Graph>) -> Result<Option<Value>, SerializationError> {
    value.map(encode).transpose()
}

/// Flatten a graph into acyclic transport JSON.
pub fn encode(graph: &Graph) -> Result<Value, SerializationError> {
    Encoder::default().encode(graph)
}

/// Rebuild a graph from transport JSON, re-linking `$ref` markers.
pub fn restore(value: &Value) -> Result<Graph, SerializationError> {
    Decoder::default().decode(value)
}

/// Deep copy through the transport form: same shape, fresh nodes, big
/// integers as strings, nothing shared with the input.
pub fn clone_graph(value: Option<&Graph>) -> Result<Option<Graph>, SerializationError> {
    snapshot(value)?.as_ref().map(restore).transpose()
}

#[derive(Default)]
struct Encoder {
    seen: HashMap<usize, u64>,
    next: u64,
}

impl Encoder {
    fn encode(&mut self, graph: &Graph) -> Result<Value, SerializationError> {
        if let Some(address) = graph.node_address() {
            if let Some(index) = self.seen.get(&address) {
                return Ok(ref_marker(*index));
            }
            self.seen.insert(address, self.next);
            self.next += 1;
        }

        match graph {
            Graph::Null => Ok(Value::Null),
            Graph::Bool(b) => Ok(Value::Bool(*b)),
            Graph::Number(n) => number_to_value(*n),
            Graph::BigInt(i) => Ok(Value::String(i.to_string())),
            Graph::Text(s) => Ok(Value::String(s.clone())),
            Graph::List(list) => {
                let items = read(list);
                let encoded = items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(encoded))
            }
            Graph::Map(map) => {
                let entries = read(map);
                let mut out = Map::with_capacity(entries.len());
                for (key, item) in entries.iter() {
                    out.insert(escape_key(key), self.encode(item)?);
                }
                Ok(Value::Object(out))
            }
        }
    }
}

#[derive(Default)]
struct Decoder {
    table: Vec<Graph>,
}

impl Decoder {
    fn decode(&mut self, value: &Value) -> Result<Graph, SerializationError> {
        match value {
            Value::Null => Ok(Graph::Null),
            Value::Bool(b) => Ok(Graph::Bool(*b)),
            Value::Number(n) => Ok(number_to_graph(n)),
            Value::String(s) => Ok(Graph::Text(s.clone())),
            Value::Array(items) => {
                let list: GraphList = Arc::new(RwLock::new(Vec::with_capacity(items.len())));
                self.table.push(Graph::List(list.clone()));
                let decoded = items
                    .iter()
                    .map(|item| self.decode(item))
                    .collect::<Result<Vec<_>, _>>()?;
                *write(&list) = decoded;
                Ok(Graph::List(list))
            }
            Value::Object(entries) => {
                if let Some(index) = as_ref_marker(entries)? {
                    return usize::try_from(index)
                        .ok()
                        .and_then(|i| self.table.get(i).cloned())
                        .ok_or(SerializationError::InvalidReference(index));
                }
                let map: GraphMap = Arc::new(RwLock::new(BTreeMap::new()));
                self.table.push(Graph::Map(map.clone()));
                let mut decoded = BTreeMap::new();
                for (key, item) in entries {
                    decoded.insert(unescape_key(key), self.decode(item)?);
                }
                *write(&map) = decoded;
                Ok(Graph::Map(map))
            }
        }
    }
}

fn ref_marker(index: u64) -> Value {
    let mut marker = Map::with_capacity(1);
    marker.insert(REF_MARKER.to_string(), Value::from(index));
    Value::Object(marker)
}

fn as_ref_marker(entries: &Map<String, Value>) -> Result<Option<u64>, SerializationError> {
    if entries.len() != 1 {
        return Ok(None);
    }
    match entries.get(REF_MARKER) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| SerializationError::Malformed(format!("bad reference index {n}"))),
        Some(other) => Err(SerializationError::Malformed(format!("bad reference index {other}"))),
        None => Ok(None),
    }
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> String {
    match key.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => rest.to_string(),
        _ => key.to_string(),
    }
}

fn number_to_value(n: f64) -> Result<Value, SerializationError> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| SerializationError::NonFiniteNumber(n.to_string()))
}

fn number_to_graph(n: &Number) -> Graph {
    if let Some(i) = n.as_i64() {
        Graph::integer(i as i128)
    } else if let Some(u) = n.as_u64() {
        Graph::integer(u as i128)
    } else {
        Graph::Number(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
