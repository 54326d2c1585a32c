//! Memoization Module
//!
//! Wraps ordinary functions so their results are cached through
//! [`CacheEngine::get_or_fetch`], keyed by a prefix and the call arguments.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::cache::keys::{canonical_parts, generate_key, DEFAULT_KEY_VERSION};
use crate::cache::{CacheEngine, CacheValue};
use crate::error::{CacheError, Result};

type ErasedFn<A> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<CacheValue>> + Send + Sync>;

// == Memoized ==
/// A function whose results are cached per argument tuple.
///
/// Async functions are built with [`Memoized::new_async`], blocking ones with
/// [`Memoized::new_blocking`] (run on tokio's blocking pool). Both are invoked
/// through [`Memoized::call`]; synchronous callers outside the runtime can use
/// [`Memoized::call_blocking`]. Every path goes through the same stampede
/// guard, so concurrent identical calls compute once.
pub struct Memoized<A, T> {
    engine: CacheEngine,
    prefix: String,
    version: String,
    ttl: Option<Duration>,
    func: ErasedFn<A>,
    handle: Option<Handle>,
    _output: PhantomData<fn() -> T>,
}

impl<A, T> Clone for Memoized<A, T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            prefix: self.prefix.clone(),
            version: self.version.clone(),
            ttl: self.ttl,
            func: Arc::clone(&self.func),
            handle: self.handle.clone(),
            _output: PhantomData,
        }
    }
}

impl<A, T> Memoized<A, T>
where
    A: Serialize + Send + 'static,
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Memoizes an async function.
    pub fn new_async<F, Fut>(
        engine: CacheEngine,
        prefix: impl Into<String>,
        ttl: Option<Duration>,
        func: F,
    ) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let erased: ErasedFn<A> = Arc::new(move |args| {
            let pending = func(args);
            async move {
                let output = pending.await?;
                Ok::<_, CacheError>(serde_json::to_value(output)?)
            }
            .boxed()
        });
        Self::from_erased(engine, prefix.into(), ttl, erased)
    }

    /// Memoizes a blocking function. Each computation runs on the blocking pool.
    pub fn new_blocking<F>(
        engine: CacheEngine,
        prefix: impl Into<String>,
        ttl: Option<Duration>,
        func: F,
    ) -> Self
    where
        F: Fn(A) -> Result<T> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        let erased: ErasedFn<A> = Arc::new(move |args| {
            let func = Arc::clone(&func);
            async move {
                let output = tokio::task::spawn_blocking(move || func(args))
                    .await
                    .map_err(|e| CacheError::fetch(format!("blocking fetch aborted: {}", e)))??;
                Ok::<_, CacheError>(serde_json::to_value(output)?)
            }
            .boxed()
        });
        Self::from_erased(engine, prefix.into(), ttl, erased)
    }

    fn from_erased(
        engine: CacheEngine,
        prefix: String,
        ttl: Option<Duration>,
        func: ErasedFn<A>,
    ) -> Self {
        Self {
            engine,
            prefix,
            version: DEFAULT_KEY_VERSION.to_string(),
            ttl,
            func,
            handle: Handle::try_current().ok(),
            _output: PhantomData,
        }
    }

    /// Changes the version tag, invalidating keys built under the old one.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The cache key a call with `args` uses.
    pub fn key_for(&self, args: &A) -> Result<String> {
        let parts = canonical_parts(args)?;
        Ok(generate_key(parts, &self.prefix, &self.version))
    }

    // == Call ==
    pub async fn call(&self, args: A) -> Result<T> {
        let key = self.key_for(&args)?;
        let func = Arc::clone(&self.func);
        let value = self
            .engine
            .get_or_fetch(&key, move || func(args), self.ttl)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Blocking variant of [`Memoized::call`] for threads outside the runtime.
    ///
    /// Uses the runtime that was current when the wrapper was built. Called
    /// from inside a runtime it returns a configuration error; use
    /// [`Memoized::call`] there.
    pub fn call_blocking(&self, args: A) -> Result<T> {
        if Handle::try_current().is_ok() {
            return Err(CacheError::Configuration(
                "call_blocking cannot run inside a tokio runtime, use call".to_string(),
            ));
        }
        let handle = self.handle.as_ref().ok_or_else(|| {
            CacheError::Configuration(
                "call_blocking needs a wrapper built inside a tokio runtime".to_string(),
            )
        })?;
        handle.block_on(self.call(args))
    }
}
