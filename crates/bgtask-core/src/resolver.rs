//! Name-to-callable resolution.
//!
//! Workers only see the [`CallableResolver`] trait. [`TaskRegistry`] is the
//! bundled implementation: namespaces of symbols registered up front, each
//! symbol either a callable or a plain value.
//!
//! Callables come in two flavours. Async callables are spawned as their own
//! tokio task; blocking callables go to the blocking thread pool. Either way
//! the invoking worker only awaits a join handle, so a slow or blocking task
//! never stalls other workers, and a panic is reported instead of unwinding
//! through the worker.

use crate::error::ResolveError;
use crate::ipc::protocol::{json_type, split_task_name};
use crate::{Result, TaskError};
use anyhow::Context;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Boxed future returned by async task bodies.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased async task body.
pub type AsyncTaskFn = Arc<dyn Fn(TaskArgs) -> TaskFuture + Send + Sync>;

/// Type-erased blocking task body.
pub type BlockingTaskFn = Arc<dyn Fn(TaskArgs) -> anyhow::Result<()> + Send + Sync>;

/// Positional and keyword arguments handed to a task body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Deserialize the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .with_context(|| format!("missing positional argument {}", index))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("positional argument {} has the wrong type", index))
    }

    /// Deserialize the keyword argument `key`.
    pub fn kwarg<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .kwargs
            .get(key)
            .with_context(|| format!("missing keyword argument {:?}", key))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("keyword argument {:?} has the wrong type", key))
    }

    /// Like [`TaskArgs::kwarg`], falling back to `default` when `key` is absent.
    pub fn kwarg_or<T: DeserializeOwned>(&self, key: &str, default: T) -> anyhow::Result<T> {
        if self.kwargs.contains_key(key) {
            self.kwarg(key)
        } else {
            Ok(default)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// Something a worker can run.
#[derive(Clone)]
pub enum Callable {
    Async(AsyncTaskFn),
    Blocking(BlockingTaskFn),
}

impl Callable {
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Callable::Async(Arc::new(move |args| Box::pin(f(args)) as TaskFuture))
    }

    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Callable::Blocking(Arc::new(f))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Callable::Blocking(_))
    }

    /// Run the callable to completion in its own execution context.
    ///
    /// Errors and panics from the body both come back as
    /// [`TaskError::InvocationFailure`].
    pub async fn invoke(&self, name: &str, args: TaskArgs) -> Result<()> {
        let joined = match self {
            Callable::Async(f) => tokio::spawn(f(args)).await,
            Callable::Blocking(f) => {
                let f = f.clone();
                tokio::task::spawn_blocking(move || f(args)).await
            }
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TaskError::InvocationFailure {
                name: name.to_string(),
                // `{:?}` on anyhow prints the full cause chain (and a backtrace
                // when RUST_BACKTRACE is set).
                message: format!("{:?}", e),
            }),
            Err(join_err) => Err(TaskError::InvocationFailure {
                name: name.to_string(),
                message: describe_join_error(join_err),
            }),
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Async(_) => f.write_str("Callable::Async"),
            Callable::Blocking(_) => f.write_str("Callable::Blocking"),
        }
    }
}

fn describe_join_error(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("task aborted: {}", err);
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

/// Turns a dotted task name into a [`Callable`].
#[async_trait::async_trait]
pub trait CallableResolver: Send + Sync + 'static {
    async fn resolve(&self, name: &str) -> std::result::Result<Callable, ResolveError>;
}

enum Symbol {
    Callable(Callable),
    Value(Value),
}

/// Resolver backed by callables registered at startup.
#[derive(Default)]
pub struct TaskRegistry {
    namespaces: HashMap<String, HashMap<String, Symbol>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async task body under `name` (`"<namespace>.<callable>"`).
    pub fn register_async<F, Fut>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(name, Symbol::Callable(Callable::from_async(f)))
    }

    /// Register a blocking task body; it will run on the blocking pool.
    pub fn register_blocking<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(TaskArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(name, Symbol::Callable(Callable::from_blocking(f)))
    }

    /// Bind a plain value. Resolving it fails with `NotInvokable`.
    pub fn register_value(&mut self, name: &str, value: Value) -> Result<()> {
        self.insert(name, Symbol::Value(value))
    }

    pub fn contains(&self, name: &str) -> bool {
        split_task_name(name)
            .and_then(|(ns, sym)| self.namespaces.get(ns).map(|m| m.contains_key(sym)))
            .unwrap_or(false)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .iter()
            .flat_map(|(ns, symbols)| symbols.keys().map(move |sym| format!("{}.{}", ns, sym)))
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        let (namespace, attr) = split_task_name(name).ok_or_else(|| TaskError::Config {
            message: format!("task name {:?} must look like <namespace>.<callable>", name),
        })?;

        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(attr.to_string(), symbol);

        debug!("Registered {}", name);
        Ok(())
    }

    fn lookup(&self, name: &str) -> std::result::Result<Callable, ResolveError> {
        let (namespace, attr) =
            split_task_name(name).ok_or_else(|| ResolveError::InvalidName(name.to_string()))?;

        let symbols = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| ResolveError::NamespaceNotFound(namespace.to_string()))?;

        match symbols.get(attr) {
            Some(Symbol::Callable(callable)) => Ok(callable.clone()),
            Some(Symbol::Value(value)) => Err(ResolveError::NotInvokable {
                name: name.to_string(),
                kind: json_type(value),
            }),
            None => Err(ResolveError::NotFound {
                namespace: namespace.to_string(),
                symbol: attr.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl CallableResolver for TaskRegistry {
    async fn resolve(&self, name: &str) -> std::result::Result<Callable, ResolveError> {
        self.lookup(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn args(args: Vec<Value>, kwargs: Value) -> TaskArgs {
        TaskArgs::new(args, kwargs.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_typed_argument_access() {
        let a = args(vec![json!("hi"), json!(3)], json!({"loud": true}));

        assert_eq!(a.arg::<String>(0).unwrap(), "hi");
        assert_eq!(a.arg::<u32>(1).unwrap(), 3);
        assert!(a.arg::<String>(1).is_err());
        assert!(a.arg::<String>(5).is_err());
        assert!(a.kwarg::<bool>("loud").unwrap());
        assert!(a.kwarg::<bool>("quiet").is_err());
        assert_eq!(a.kwarg_or("times", 1u32).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolution_outcomes() {
        let mut registry = TaskRegistry::new();
        registry
            .register_async("tasks.ping", |_| async { Ok(()) })
            .unwrap();
        registry
            .register_value("tasks.VERSION", json!("1.0"))
            .unwrap();

        assert!(registry.resolve("tasks.ping").await.is_ok());
        assert_eq!(
            registry.resolve("tasks.VERSION").await.unwrap_err(),
            ResolveError::NotInvokable {
                name: "tasks.VERSION".into(),
                kind: "a string"
            }
        );
        assert_eq!(
            registry.resolve("tasks.pong").await.unwrap_err(),
            ResolveError::NotFound {
                namespace: "tasks".into(),
                symbol: "pong".into()
            }
        );
        assert_eq!(
            registry.resolve("other.ping").await.unwrap_err(),
            ResolveError::NamespaceNotFound("other".into())
        );
        assert_eq!(
            registry.resolve("ping").await.unwrap_err(),
            ResolveError::InvalidName("ping".into())
        );
    }

    #[test]
    fn test_register_rejects_undotted_name() {
        let mut registry = TaskRegistry::new();
        let result = registry.register_blocking("ping", |_| Ok(()));
        assert!(matches!(result, Err(TaskError::Config { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_and_contains() {
        let mut registry = TaskRegistry::new();
        registry.register_blocking("b.two", |_| Ok(())).unwrap();
        registry.register_blocking("a.one", |_| Ok(())).unwrap();
        registry.register_blocking("a.deep.three", |_| Ok(())).unwrap();

        assert_eq!(registry.names(), vec!["a.deep.three", "a.one", "b.two"]);
        assert!(registry.contains("a.deep.three"));
        assert!(!registry.contains("a.deep"));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_invoke_async_and_blocking() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let async_log = log.clone();
        let async_fn = Callable::from_async(move |a: TaskArgs| {
            let log = async_log.clone();
            async move {
                let word: String = a.arg(0)?;
                log.lock().unwrap().push(word);
                Ok::<(), anyhow::Error>(())
            }
        });

        let blocking_log = log.clone();
        let blocking_fn = Callable::from_blocking(move |a: TaskArgs| {
            blocking_log.lock().unwrap().push(a.kwarg::<String>("word")?);
            Ok(())
        });
        assert!(blocking_fn.is_blocking());

        async_fn
            .invoke("t.a", args(vec![json!("first")], json!({})))
            .await
            .unwrap();
        blocking_fn
            .invoke("t.b", args(vec![], json!({"word": "second"})))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_invoke_reports_errors_and_panics() {
        let failing = Callable::from_async(|_| async { Err(anyhow::anyhow!("disk full")) });
        let err = failing.invoke("t.fail", TaskArgs::default()).await.unwrap_err();
        match err {
            TaskError::InvocationFailure { name, message } => {
                assert_eq!(name, "t.fail");
                assert!(message.contains("disk full"));
            }
            other => panic!("Expected InvocationFailure, got: {:?}", other),
        }

        let panicking = Callable::from_blocking(|_| panic!("bad state"));
        let err = panicking
            .invoke("t.panic", TaskArgs::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked: bad state"));

        let missing_arg = Callable::from_blocking(|a: TaskArgs| a.arg::<String>(0).map(|_| ()));
        let err = missing_arg
            .invoke("t.args", TaskArgs::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing positional argument 0"));
    }
}
