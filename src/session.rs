use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use serde::{Serialize, de::DeserializeOwned};
use tokio::task::JoinHandle;

use crate::{
    backend::SessionBackend,
    error::{Error, Result},
    value::{self, Value, Values},
};

/// A one-shot value. Reading it schedules removal; the removal itself happens on the next
/// store-mediated access.
#[derive(Debug, Clone)]
enum Flash {
    Active(Value),
    PendingRemoval(Value),
}

impl Flash {
    fn value(&self) -> &Value {
        match self {
            Flash::Active(value) | Flash::PendingRemoval(value) => value,
        }
    }

    fn consume(&mut self) -> Value {
        if let Flash::Active(value) = self {
            *self = Flash::PendingRemoval(std::mem::take(value));
        }
        self.value().clone()
    }
}

#[derive(Debug, Default)]
struct State {
    values: Values,
    flashes: HashMap<String, Flash>,
    destroyed: bool,
}

/// Pending decay of a session. Dropping it detaches the task, [`DecayTimer::cancel`] aborts it.
#[derive(Debug)]
pub(crate) struct DecayTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl DecayTimer {
    pub(crate) fn new(generation: u64, handle: JoinHandle<()>) -> Self {
        Self { generation, handle }
    }

    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

struct Inner {
    id: String,
    state: RwLock<State>,
    timer: Mutex<Option<DecayTimer>>,
    // Serializes backend writes against each other and against retirement.
    writes: tokio::sync::Mutex<()>,
    backend: Option<Arc<dyn SessionBackend>>,
}

/// Handle to the server-side state of one client.
///
/// Cloning is cheap and every clone refers to the same session. Reads take a shared lock,
/// mutations an exclusive one. `set`, `delete` and `clear` write the resulting snapshot through
/// to the backend before returning.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("values", &state.values.len())
            .field("flashes", &state.flashes.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        values: Values,
        backend: Option<Arc<dyn SessionBackend>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                state: RwLock::new(State {
                    values,
                    ..State::default()
                }),
                timer: Mutex::new(None),
                writes: tokio::sync::Mutex::new(()),
                backend,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.read().values.get(key).cloned()
    }

    pub fn get_structure<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.typed(key, |value| {
            T::deserialize(value).map_err(|_| {
                value::coercion_error(std::any::type_name::<T>(), key, value)
            })
        })
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.typed(key, |value| value::string(key, value))
    }

    pub fn get_int(&self, key: &str) -> Result<i32> {
        self.typed(key, |value| value::integer("int", key, value))
    }

    pub fn get_uint(&self, key: &str) -> Result<u32> {
        self.typed(key, |value| value::integer("uint", key, value))
    }

    pub fn get_int64(&self, key: &str) -> Result<i64> {
        self.typed(key, |value| value::integer("int64", key, value))
    }

    pub fn get_float32(&self, key: &str) -> Result<f32> {
        self.typed(key, |value| value::float("float32", key, value).map(|f| f as f32))
    }

    pub fn get_float64(&self, key: &str) -> Result<f64> {
        self.typed(key, |value| value::float("float64", key, value))
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool> {
        self.typed(key, |value| value::boolean(key, value))
    }

    fn typed<T>(&self, key: &str, convert: impl FnOnce(&Value) -> Result<T>) -> Result<T> {
        let state = self.inner.state.read();
        let value = state
            .values
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_owned()))?;
        convert(value)
    }

    pub fn get_all(&self) -> Values {
        self.inner.state.read().values.clone()
    }

    pub fn visit_all(&self, mut visit: impl FnMut(&str, &Value)) {
        for (key, value) in &self.get_all() {
            visit(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().values.is_empty()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|err| Error::Malformed(err.to_string()))?;
        self.set_value(key, value).await;
        Ok(())
    }

    pub async fn set_value(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.mutate(|values| {
            values.insert(key, value);
        });
        self.sync().await;
    }

    pub async fn delete(&self, key: &str) -> Option<Value> {
        let removed = self.mutate(|values| values.remove(key));
        self.sync().await;
        removed
    }

    /// Remove every value. Flash messages are left alone.
    pub async fn clear(&self) {
        self.mutate(Values::clear);
        self.sync().await;
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut Values) -> R) -> R {
        apply(&mut self.inner.state.write().values)
    }

    // The snapshot is taken under the write lock, so writes land in order and none can follow
    // the delete issued by `retire`.
    async fn sync(&self) {
        let Some(backend) = &self.inner.backend else {
            return;
        };
        let _writes = self.inner.writes.lock().await;

        let values = {
            let state = self.inner.state.read();
            if state.destroyed {
                return;
            }
            state.values.clone()
        };

        if let Err(err) = backend.update(&self.inner.id, &values).await {
            tracing::warn!(
                err = %err,
                session_id = %self.inner.id,
                "session backend update failed, dropping write"
            );
        }
    }

    /// Store a one-shot value that survives until the first access after it has been read.
    pub fn set_flash(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|err| Error::Malformed(err.to_string()))?;
        self.set_flash_value(key, value);
        Ok(())
    }

    pub fn set_flash_value(&self, key: impl Into<String>, value: Value) {
        self.inner
            .state
            .write()
            .flashes
            .insert(key.into(), Flash::Active(value));
    }

    pub fn get_flash(&self, key: &str) -> Option<Value> {
        self.inner
            .state
            .write()
            .flashes
            .get_mut(key)
            .map(Flash::consume)
    }

    pub fn get_flash_string(&self, key: &str) -> Option<String> {
        match self.get_flash(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_flashes(&self) -> HashMap<String, Value> {
        self.inner
            .state
            .write()
            .flashes
            .iter_mut()
            .map(|(key, flash)| (key.clone(), flash.consume()))
            .collect()
    }

    pub fn has_flash(&self) -> bool {
        !self.inner.state.read().flashes.is_empty()
    }

    pub fn delete_flash(&self, key: &str) {
        self.inner.state.write().flashes.remove(key);
    }

    pub fn clear_flashes(&self) {
        self.inner.state.write().flashes.clear();
    }

    pub(crate) fn run_flash_gc(&self) {
        self.inner
            .state
            .write()
            .flashes
            .retain(|_, flash| matches!(flash, Flash::Active(_)));
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.state.read().destroyed
    }

    pub(crate) fn replace_timer(&self, timer: DecayTimer) {
        let previous = self.inner.timer.lock().replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub(crate) fn timer_generation(&self) -> Option<u64> {
        self.inner.timer.lock().as_ref().map(|timer| timer.generation)
    }

    /// Mark the session destroyed, drop its state and delete the persisted values. Hands back
    /// the pending timer, if any.
    pub(crate) async fn retire(&self) -> Option<DecayTimer> {
        let _writes = self.inner.writes.lock().await;
        {
            let mut state = self.inner.state.write();
            state.destroyed = true;
            state.values.clear();
            state.flashes.clear();
        }
        let timer = self.inner.timer.lock().take();

        if let Some(backend) = &self.inner.backend
            && let Err(err) = backend.update(&self.inner.id, &Values::new()).await
        {
            tracing::warn!(err = %err, session_id = %self.inner.id, "session backend delete failed");
        }

        timer
    }
}
