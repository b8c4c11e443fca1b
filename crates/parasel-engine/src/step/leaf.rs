use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::debug;

use parasel_core::context::Context;
use parasel_core::error::{ParaselError, Result};

use super::StepInfo;

/// What a leaf function returns: an optional value for the output key.
pub type LeafOutput = anyhow::Result<Option<Value>>;

type SyncFn = dyn Fn(LeafInput) -> LeafOutput + Send + Sync;
type AsyncFn = dyn Fn(LeafInput) -> BoxFuture<'static, LeafOutput> + Send + Sync;

/// Everything a leaf function is called with.
#[derive(Debug, Clone)]
pub struct LeafInput {
    /// Handle to the run's shared context.
    pub context: Context,
    /// The leaf's fixed arguments, plus any bound by a fan-out.
    pub args: Map<String, Value>,
    /// The output key, when the leaf was built with `pass_output_key`.
    pub out_name: Option<String>,
}

impl LeafInput {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Argument that must be present.
    pub fn require_arg(&self, name: &str) -> anyhow::Result<&Value> {
        self.args
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("missing argument '{}'", name))
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }
}

#[derive(Clone)]
enum LeafFn {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// A step wrapping one user function.
///
/// The function receives a [`LeafInput`] and returns an optional value.
/// A returned value (other than `null`) is written to the output key: as an
/// overwrite normally, or merged with [`Context::accumulate`] when the leaf
/// is in accumulate mode (fan-out clones always are). Functions may also
/// read and write the context directly through `LeafInput::context`.
#[derive(Clone)]
pub struct Leaf {
    pub(crate) info: StepInfo,
    func: LeafFn,
    out_name: Option<String>,
    args: Map<String, Value>,
    pass_output_key: bool,
    accumulate: bool,
}

impl Leaf {
    /// Wrap a synchronous function. It runs on the blocking thread pool.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(LeafInput) -> LeafOutput + Send + Sync + 'static,
    {
        Self::with_fn(name, LeafFn::Sync(Arc::new(func)))
    }

    /// Wrap an asynchronous function. It is polled on the runtime directly.
    pub fn new_async<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(LeafInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LeafOutput> + Send + 'static,
    {
        Self::with_fn(name, LeafFn::Async(Arc::new(move |input| func(input).boxed())))
    }

    fn with_fn(name: impl Into<String>, func: LeafFn) -> Self {
        Self {
            info: StepInfo::new(name),
            func,
            out_name: None,
            args: Map::new(),
            pass_output_key: false,
            accumulate: false,
        }
    }

    /// Context key the returned value is written to.
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.out_name = Some(key.into());
        self
    }

    /// Add a fixed argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Add several fixed arguments (overwrites on conflict).
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args.extend(args);
        self
    }

    /// Hand the output key name to the function in `LeafInput::out_name`.
    pub fn pass_output_key(mut self) -> Self {
        self.pass_output_key = true;
        self
    }

    /// Merge returned values into a sequence instead of overwriting.
    pub fn with_accumulate(mut self, accumulate: bool) -> Self {
        self.accumulate = accumulate;
        self
    }

    pub fn output(&self) -> Option<&str> {
        self.out_name.as_deref()
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn is_async(&self) -> bool {
        matches!(self.func, LeafFn::Async(_))
    }

    pub fn accumulates(&self) -> bool {
        self.accumulate
    }

    /// Copy of this leaf for a fan-out: extra arguments bound, accumulate on.
    pub(crate) fn fan_out_clone(
        &self,
        name: String,
        bound: impl IntoIterator<Item = (String, Value)>,
    ) -> Leaf {
        let mut clone = self.clone();
        clone.info.name = name;
        clone.args.extend(bound);
        clone.accumulate = true;
        clone
    }

    /// Call the function and reconcile its result with the context.
    pub(crate) async fn invoke(&self, ctx: &Context) -> Result<()> {
        let input = LeafInput {
            context: ctx.clone(),
            args: self.args.clone(),
            out_name: if self.pass_output_key {
                self.out_name.clone()
            } else {
                None
            },
        };

        let outcome = match &self.func {
            LeafFn::Sync(func) => {
                let func = func.clone();
                match tokio::task::spawn_blocking(move || func(input)).await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow::anyhow!("function panicked: {}", e)),
                }
            }
            LeafFn::Async(func) => match AssertUnwindSafe(func(input)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("function panicked")),
            },
        };

        let value = outcome.map_err(|cause| ParaselError::Leaf {
            step: self.info.name.clone(),
            cause,
        })?;
        self.write_back(ctx, value);
        Ok(())
    }

    fn write_back(&self, ctx: &Context, value: Option<Value>) {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => return,
        };
        match &self.out_name {
            Some(key) if self.accumulate => ctx.accumulate(key.clone(), value),
            Some(key) => ctx.set(key.clone(), value),
            None => debug!(step = %self.info.name, "Leaf returned a value but has no output key"),
        }
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("name", &self.info.name)
            .field("out_name", &self.out_name)
            .field("args", &self.args)
            .field("async", &self.is_async())
            .field("accumulate", &self.accumulate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_leaf_overwrites_output() {
        let ctx = Context::from_json(json!({"x": 5, "out": "old"}));
        let leaf = Leaf::new("add_ten", |input: LeafInput| {
            let x = input.context.get_i64("x").unwrap_or(0);
            Ok(Some(json!(x + 10)))
        })
        .with_output("out");

        leaf.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get("out"), Some(json!(15)));
        assert!(!leaf.is_async());
    }

    #[tokio::test]
    async fn test_async_leaf() {
        let ctx = Context::new();
        let leaf = Leaf::new_async("greet", |input: LeafInput| async move {
            let who = input.arg_str("who").unwrap_or("nobody").to_string();
            Ok(Some(json!(format!("hello {}", who))))
        })
        .with_arg("who", json!("world"))
        .with_output("greeting");

        leaf.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("greeting"), Some("hello world".into()));
        assert!(leaf.is_async());
    }

    #[tokio::test]
    async fn test_accumulate_mode_merges() {
        let ctx = Context::from_json(json!({"out": "seed"}));
        let leaf = Leaf::new("emit", |_| Ok(Some(json!(1))))
            .with_output("out")
            .with_accumulate(true);

        leaf.invoke(&ctx).await.unwrap();
        leaf.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get("out"), Some(json!(["seed", 1, 1])));
    }

    #[tokio::test]
    async fn test_none_and_null_leave_key_untouched() {
        let ctx = Context::from_json(json!({"out": 3}));
        let none = Leaf::new("none", |_| Ok(None)).with_output("out");
        let null = Leaf::new("null", |_| Ok(Some(Value::Null)))
            .with_output("out")
            .with_accumulate(true);

        none.invoke(&ctx).await.unwrap();
        null.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get("out"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_direct_writes_are_kept() {
        let ctx = Context::new();
        let leaf = Leaf::new("direct", |input: LeafInput| {
            let key = input.out_name.clone().unwrap();
            input.context.set(key, json!("written"));
            Ok(None)
        })
        .with_output("result")
        .pass_output_key();

        leaf.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get_string("result"), Some("written".into()));
    }

    #[tokio::test]
    async fn test_out_name_hidden_without_flag() {
        let ctx = Context::new();
        let leaf = Leaf::new("probe", |input: LeafInput| {
            Ok(Some(json!(input.out_name.is_some())))
        })
        .with_output("seen");

        leaf.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.get("seen"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_error_is_wrapped_with_step_name() {
        let ctx = Context::new();
        let leaf = Leaf::new("explode", |_| anyhow::bail!("kaboom"));

        let err = leaf.invoke(&ctx).await.unwrap_err();
        match err {
            ParaselError::Leaf { step, cause } => {
                assert_eq!(step, "explode");
                assert_eq!(cause.to_string(), "kaboom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_leaf_failure() {
        let ctx = Context::new();
        let sync = Leaf::new("sync_panic", |_| panic!("sync boom"));
        let async_leaf = Leaf::new_async("async_panic", |_| async {
            if true {
                panic!("async boom");
            }
            Ok(None)
        });

        assert!(matches!(
            sync.invoke(&ctx).await,
            Err(ParaselError::Leaf { .. })
        ));
        assert!(matches!(
            async_leaf.invoke(&ctx).await,
            Err(ParaselError::Leaf { .. })
        ));
    }

    #[test]
    fn test_fan_out_clone() {
        let template = Leaf::new("search", |_| Ok(None))
            .with_output("results")
            .with_arg("limit", json!(3));
        let clone = template.fan_out_clone("search[0]".into(), [("query".to_string(), json!("rust"))]);

        assert_eq!(clone.info.name, "search[0]");
        assert_eq!(clone.output(), Some("results"));
        assert!(clone.accumulates());
        assert_eq!(clone.args()["limit"], json!(3));
        assert_eq!(clone.args()["query"], json!("rust"));
        assert!(!template.accumulates());
    }
}
