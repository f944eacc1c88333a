//! Sandboxed, single-threaded cooperative script runtime used by the
//! script rule and by route-catalog handlers. Each execution gets a
//! fresh engine; blocking work (HTTP, cache) runs off-thread and is
//! resumed by posting completions back onto the loop.

mod event_loop;
mod fetch;
mod modules;
mod shims;
mod transpile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boa_engine::object::builtins::JsPromise;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsValue, NativeFunction, Source};
use serde_json::Value;

use crate::cache::{Cache, CacheError};
use crate::errors::{AppError, AppResult};
use crate::fetch::Fetcher;
use crate::util;

pub use event_loop::LoopState;

const POLYFILL: &str = include_str!("js/polyfill.js");

pub const ROUTE_EXPIRE: Duration = Duration::from_secs(5 * 60);
pub const CONTENT_EXPIRE: Duration = Duration::from_secs(60 * 60);
pub const SRC_EXPIRE: Duration = Duration::from_secs(6 * 60 * 60);

/// Host facilities injected into every runtime instance. Built once at
/// startup; shim registries live here rather than in module-level
/// globals.
pub struct Registry {
    pub cache: Arc<Cache>,
    pub fetcher: Arc<Fetcher>,
    pub handle: tokio::runtime::Handle,
    pub catalog: Catalog,
    pub env: HashMap<String, String>,
}

impl Registry {
    pub fn new(
        cache: Arc<Cache>,
        fetcher: Arc<Fetcher>,
        handle: tokio::runtime::Handle,
        routes_url: String,
        src_url: String,
    ) -> Self {
        Registry {
            cache,
            fetcher,
            handle,
            catalog: Catalog::new(routes_url, src_url),
            env: std::env::vars().collect(),
        }
    }
}

/// Remote route-catalog sources: fetched through the content cache,
/// transpiled once, and memoized by path.
pub struct Catalog {
    pub routes_url: String,
    pub src_url: String,
    modules: Mutex<HashMap<String, Arc<String>>>,
}

impl Catalog {
    fn new(routes_url: String, src_url: String) -> Self {
        Catalog {
            routes_url,
            src_url,
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// The transpiled CommonJS source for a catalog module path like
    /// `/lib/routes/<ns>/<name>.ts`.
    pub fn module_source(&self, path: &str, registry: &Registry) -> AppResult<Arc<String>> {
        if let Some(found) = self.modules.lock().unwrap().get(path) {
            return Ok(found.clone());
        }

        let url = format!("{}{}", self.src_url.trim_end_matches('/'), path);
        let bytes = fetch_cached(registry, &url, SRC_EXPIRE)?;
        let mut code = String::from_utf8_lossy(&bytes).into_owned();
        if path == "/lib/config.ts" {
            // The upstream config lazily imports its logger; the
            // sandbox has no use for it.
            code = code.replace("import('@/utils/logger')", "({})");
        }
        let transpiled = Arc::new(transpile::to_common_js(&code));

        self.modules
            .lock()
            .unwrap()
            .insert(path.to_string(), transpiled.clone());
        Ok(transpiled)
    }

    /// The parsed catalog index: namespace to route-pattern map.
    pub fn routes_index(&self, registry: &Registry) -> AppResult<HashMap<String, Namespace>> {
        let bytes = fetch_cached(registry, &self.routes_url, SRC_EXPIRE)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// A raw (untranspiled) source file, for template rendering.
    pub fn file(&self, path: &str, registry: &Registry) -> AppResult<String> {
        let url = format!("{}/{}", self.src_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let bytes = fetch_cached(registry, &url, SRC_EXPIRE)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub routes: HashMap<String, RouteEntry>,
}

#[derive(Debug, serde::Deserialize)]
pub struct RouteEntry {
    #[serde(default)]
    pub location: String,
}

fn fetch_cached(registry: &Registry, url: &str, ttl: Duration) -> AppResult<Vec<u8>> {
    let cache = registry.cache.clone();
    let fetcher = registry.fetcher.clone();
    let url_owned = url.to_string();
    registry
        .handle
        .block_on(async move {
            cache
                .try_get(&url_owned, ttl, false, || async {
                    let request = crate::fetch::FetchRequest::get(&url_owned);
                    let page = fetcher
                        .execute(&request)
                        .await
                        .map_err(|err| CacheError::Producer(err.to_string()))?;
                    Ok(page.bytes)
                })
                .await
        })
        .map_err(|err| AppError::Transport(err.to_string()))
}

/// One script execution: a boa context plus the loop state native
/// functions reach through a thread-local slot.
pub struct Runtime {
    context: Context,
    state: event_loop::SharedState,
    completions: std::sync::mpsc::Receiver<event_loop::Completion>,
}

impl Drop for Runtime {
    fn drop(&mut self) {
        event_loop::uninstall();
    }
}

impl Runtime {
    pub fn new(registry: Arc<Registry>) -> AppResult<Runtime> {
        let (state, completions) = event_loop::LoopState::install(registry.clone());
        let mut context = Context::default();

        context
            .register_global_callable(
                js_string!("require"),
                1,
                NativeFunction::from_fn_ptr(modules::js_require),
            )
            .map_err(|err| AppError::Script(format!("{err}")))?;
        context
            .register_global_callable(
                js_string!("$fetch"),
                2,
                NativeFunction::from_fn_ptr(fetch::js_fetch),
            )
            .map_err(|err| AppError::Script(format!("{err}")))?;

        let env = serde_json::json!({ "env": registry.env.clone() });
        let process = JsValue::from_json(&env, &mut context)
            .map_err(|err| AppError::Script(format!("{err}")))?;
        context
            .register_global_property(js_string!("process"), process, Attribute::all())
            .map_err(|err| AppError::Script(format!("{err}")))?;

        context
            .eval(Source::from_bytes(POLYFILL))
            .map_err(|err| AppError::Script(format!("polyfill: {err}")))?;

        Ok(Runtime {
            context,
            state,
            completions,
        })
    }

    /// Script-rule execution: evaluate the script with a fresh
    /// `module.exports`, then JSON-round-trip whatever it exported.
    pub fn eval_module_exports(mut self, script: &str) -> AppResult<Value> {
        let module = self
            .context
            .eval(Source::from_bytes(
                "globalThis.module = { exports: {} }; module",
            ))
            .map_err(|err| AppError::Script(format!("{err}")))?;

        if let Err(err) = self.context.eval(Source::from_bytes(script)) {
            return Err(AppError::Script(event_loop::error_message(
                err,
                &mut self.context,
            )));
        }
        self.context.run_jobs();

        let exports = module
            .as_object()
            .and_then(|module| module.get(js_string!("exports"), &mut self.context).ok())
            .unwrap_or_default();
        if exports.is_null_or_undefined() {
            return Ok(Value::Null);
        }
        exports
            .to_json(&mut self.context)
            .map_err(|err| AppError::Script(format!("exports: {err}")))
    }

    /// Route execution: require the module, call `route.handler(ctx)`,
    /// drive the loop until its promise settles, then export the
    /// result with `pubDate`/`updated` re-serialized canonically.
    pub fn run_route(
        mut self,
        namespace: &str,
        location: &str,
        path: &str,
        params: &HashMap<String, String>,
        queries: &HashMap<String, String>,
    ) -> AppResult<Value> {
        let location = location.trim_end_matches(".ts");
        let joined = modules::normalize_path(&format!("/lib/routes/{namespace}/{location}"));
        let dir = modules::parent_dir(&joined);
        self.state.borrow_mut().dir_stack.push(dir);

        let basename = location.rsplit('/').next().unwrap_or(location);
        let handler = self
            .context
            .eval(Source::from_bytes(
                format!("require('./{basename}').route.handler").as_bytes(),
            ))
            .map_err(|err| {
                let msg = event_loop::error_message(err, &mut self.context);
                AppError::Script(msg)
            })?;
        let Some(handler_fn) = handler.as_callable() else {
            return Err(AppError::Script(format!(
                "route {namespace}/{location} has no handler"
            )));
        };

        let ctx_value = {
            let input = serde_json::json!({
                "path": path,
                "params": params,
                "queries": queries,
            });
            let input = JsValue::from_json(&input, &mut self.context)
                .map_err(|err| AppError::Script(format!("{err}")))?;
            let make_ctx = self
                .context
                .global_object()
                .get(js_string!("__makeCtx"), &mut self.context)
                .map_err(|err| AppError::Script(format!("{err}")))?;
            make_ctx
                .as_callable()
                .ok_or_else(|| AppError::Script("polyfill missing __makeCtx".into()))?
                .call(&JsValue::undefined(), &[input], &mut self.context)
                .map_err(|err| AppError::Script(format!("{err}")))?
        };

        let result = handler_fn
            .call(&JsValue::undefined(), &[ctx_value], &mut self.context)
            .map_err(|err| {
                let msg = event_loop::error_message(err, &mut self.context);
                AppError::Script(msg)
            })?;

        let value = match result.as_object().cloned().map(JsPromise::from_object) {
            Some(Ok(promise)) => event_loop::drive(
                &mut self.context,
                &self.state,
                &self.completions,
                Some(&promise),
            )?,
            _ => result,
        };

        let mut data = value
            .to_json(&mut self.context)
            .map_err(|err| AppError::Script(format!("route data: {err}")))?;
        canonicalize_dates(&mut data);
        Ok(data)
    }
}

/// Route handlers hand back dates in whatever form the upstream used;
/// normalize `pubDate`/`updated` to ISO before the JSON-Feed pass.
fn canonicalize_dates(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in ["pubDate", "updated"] {
                if let Some(date_value) = map.get(key) {
                    if let Some(parsed) = crate::feed::dates::parse_date_value(date_value) {
                        map.insert(key.to_string(), Value::String(parsed.to_rfc3339()));
                    }
                }
            }
            for child in map.values_mut() {
                canonicalize_dates(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                canonicalize_dates(item);
            }
        }
        _ => {}
    }
}

pub(crate) fn user_agent() -> &'static str {
    util::USER_AGENT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(Cache::new(Box::new(crate::cache::Memory::new()))),
            Arc::new(Fetcher::new()),
            tokio::runtime::Handle::current(),
            String::new(),
            String::new(),
        ))
    }

    #[tokio::test]
    async fn module_exports_round_trip() {
        let registry = test_registry();
        let value = tokio::task::spawn_blocking(move || {
            Runtime::new(registry)?.eval_module_exports(
                r#"
                module.exports = {
                    title: 'Scripted',
                    home_page_url: 'https://example.com',
                    items: [{ id: '1', url: 'https://example.com/1', title: 'one' }],
                };
                "#,
            )
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value["title"], "Scripted");
        assert_eq!(value["items"][0]["id"], "1");
    }

    #[tokio::test]
    async fn script_errors_carry_the_message() {
        let registry = test_registry();
        let result = tokio::task::spawn_blocking(move || {
            Runtime::new(registry)?.eval_module_exports("throw new Error('kaboom')")
        })
        .await
        .unwrap();
        let Err(AppError::Script(message)) = result else {
            panic!("expected a script error")
        };
        assert!(message.contains("kaboom"));
    }

    #[tokio::test]
    async fn require_of_native_shims_works() {
        let registry = test_registry();
        let value = tokio::task::spawn_blocking(move || {
            Runtime::new(registry)?.eval_module_exports(
                r#"
                const path = require('node:path');
                const md5 = require('@/utils/md5');
                module.exports = {
                    joined: path.join('a', 'b', '..', 'c'),
                    digest: md5('abc'),
                };
                "#,
            )
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value["joined"], "a/c");
        assert_eq!(value["digest"], "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn missing_modules_error_deterministically() {
        let registry = test_registry();
        let result = tokio::task::spawn_blocking(move || {
            Runtime::new(registry)?.eval_module_exports("require('definitely-not-a-module')")
        })
        .await
        .unwrap();
        let Err(AppError::Script(message)) = result else {
            panic!("expected a script error")
        };
        assert!(message.contains("no such module"));
    }

    #[test]
    fn canonicalize_rewrites_nested_date_fields() {
        let mut value = serde_json::json!({
            "item": [
                {"title": "a", "pubDate": "Sat, 01 Jan 2000 08:00:00 GMT"},
                {"title": "b", "updated": 946713600000i64},
            ]
        });
        canonicalize_dates(&mut value);
        assert_eq!(value["item"][0]["pubDate"], "2000-01-01T08:00:00+00:00");
        assert_eq!(value["item"][1]["updated"], "2000-01-01T08:00:00+00:00");
    }
}
