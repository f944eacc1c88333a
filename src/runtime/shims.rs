//! Native modules exposed to scripts. Each returns a fresh exports
//! value; the module map in the loop state handles caching.

use std::time::Duration;

use boa_engine::object::builtins::JsPromise;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction};

use super::event_loop::{self, Completion, IoPayload, PayloadKind, PendingPromise};
use super::modules;
use crate::cache::CacheError;

/// Builds the exports for a native shim, or `None` when the name is
/// not a native module.
pub fn load(name: &str, context: &mut Context) -> JsResult<Option<JsValue>> {
    let exports = match name {
        "assert" => Some(
            ObjectInitializer::new(context)
                .function(NativeFunction::from_fn_ptr(assert_strict), js_string!("strict"), 2)
                .build()
                .into(),
        ),
        "path" => Some(
            ObjectInitializer::new(context)
                .function(NativeFunction::from_fn_ptr(path_join), js_string!("join"), 2)
                .function(
                    NativeFunction::from_fn_ptr(path_dirname),
                    js_string!("dirname"),
                    1,
                )
                .build()
                .into(),
        ),
        "url" => Some(
            ObjectInitializer::new(context)
                .function(
                    NativeFunction::from_fn_ptr(identity),
                    js_string!("fileURLToPath"),
                    1,
                )
                .build()
                .into(),
        ),
        // Routes import these for side effects only.
        "dotenv/config" | "ofetch" => Some(ObjectInitializer::new(context).build().into()),
        "@/types" => {
            let view_type = ObjectInitializer::new(context).build();
            Some(
                ObjectInitializer::new(context)
                    .property(js_string!("ViewType"), view_type, Attribute::all())
                    .build()
                    .into(),
            )
        }
        "@/utils/md5" => Some(function_value(md5_hex, context)),
        "@/utils/rand-user-agent" => Some(function_value(rand_user_agent, context)),
        "@/utils/logger" => {
            let mut init = ObjectInitializer::new(context);
            for level in ["debug", "info", "warn", "error", "http"] {
                init.function(
                    NativeFunction::from_fn_ptr(noop),
                    boa_engine::JsString::from(level),
                    0,
                );
            }
            Some(init.build().into())
        }
        "@/utils/cache" => Some(
            ObjectInitializer::new(context)
                .function(
                    NativeFunction::from_fn_ptr(cache_try_get),
                    js_string!("tryGet"),
                    4,
                )
                .build()
                .into(),
        ),
        "@/utils/render" => Some(render_module(context)?),
        _ => None,
    };

    Ok(exports)
}

fn function_value(
    f: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsValue {
    NativeFunction::from_fn_ptr(f)
        .to_js_function(context.realm())
        .into()
}

fn noop(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::undefined())
}

fn assert_strict(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.first().cloned().unwrap_or_default();
    if value.to_boolean() {
        return Ok(JsValue::undefined());
    }
    let message = args
        .get(1)
        .map(|m| m.to_string(context))
        .transpose()?
        .map(|m| m.to_std_string_escaped())
        .unwrap_or_else(|| "assertion failed".to_string());
    Err(JsNativeError::error().with_message(message).into())
}

fn path_join(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut parts = Vec::new();
    for arg in args {
        let part = arg.to_string(context)?.to_std_string_escaped();
        if !part.is_empty() {
            parts.push(part);
        }
    }
    let joined = modules::normalize_path(&parts.join("/"));
    Ok(boa_engine::JsString::from(joined).into())
}

fn path_dirname(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let path = args
        .first()
        .cloned()
        .unwrap_or_default()
        .to_string(context)?
        .to_std_string_escaped();
    Ok(boa_engine::JsString::from(modules::parent_dir(&path)).into())
}

fn identity(_this: &JsValue, args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    Ok(args.first().cloned().unwrap_or_default())
}

fn rand_user_agent(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    Ok(boa_engine::JsString::from(super::user_agent()).into())
}

fn md5_hex(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let data = args
        .first()
        .cloned()
        .unwrap_or_default()
        .to_string(context)?
        .to_std_string_escaped();
    let digest = md5::compute(data.as_bytes());
    Ok(boa_engine::JsString::from(format!("{digest:x}")).into())
}

/// `cache.tryGet(key, producer, maxAge?, extend?)`: bounce through the
/// shared cache with single-flight; the producer runs back on this
/// loop and its JSON-serialized result is what gets stored.
fn cache_try_get(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let key = args
        .first()
        .cloned()
        .unwrap_or_default()
        .to_string(context)?
        .to_std_string_escaped();
    let producer = args
        .get(1)
        .and_then(|value| value.as_object().cloned())
        .filter(|object| object.is_callable());
    let Some(producer) = producer else {
        return Err(JsNativeError::typ()
            .with_message("tryGet: producer must be a function")
            .into());
    };
    let ttl = match args.get(2) {
        Some(value) if value.is_null_or_undefined() => super::CONTENT_EXPIRE,
        Some(value) => Duration::from_secs(value.to_number(context)? as u64),
        None => super::CONTENT_EXPIRE,
    };
    let extend = match args.get(3) {
        Some(value) if !value.is_null_or_undefined() => value.to_boolean(),
        _ => true,
    };

    let (id, completions, registry) = event_loop::with_state(|state| {
        let id = state.next_id();
        state.pending_io += 1;
        state.producers.insert(id, producer.clone());
        (id, state.completions.clone(), state.registry.clone())
    });

    let promise = JsPromise::new(
        |resolvers, _context| {
            event_loop::with_state(|state| {
                state.resolvers.insert(
                    id,
                    PendingPromise {
                        resolve: resolvers.resolve.clone(),
                        reject: resolvers.reject.clone(),
                        kind: PayloadKind::CacheValue,
                    },
                );
            });
            Ok(JsValue::undefined())
        },
        context,
    );

    let producer_tx = completions.clone();
    registry.handle.clone().spawn(async move {
        let cache = registry.cache.clone();
        let result = cache
            .try_get(&key, ttl, extend, move || async move {
                let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
                producer_tx
                    .send(Completion::RunProducer(id, reply_tx))
                    .map_err(|_| CacheError::Producer("script loop gone".into()))?;
                match reply_rx.await {
                    Ok(result) => result.map_err(CacheError::Producer),
                    Err(_) => Err(CacheError::Producer("producer dropped".into())),
                }
            })
            .await;
        let _ = completions.send(Completion::Io(
            id,
            result.map(IoPayload::Bytes).map_err(|err| err.to_string()),
        ));
    });

    Ok(promise.into())
}

/// `render.art(filename, data)` fetches the template source and hands
/// it to the bundled template engine. Requires `art-template` to be in
/// the bundled inventory; without it the require fails the same way
/// any missing module does.
fn render_module(context: &mut Context) -> JsResult<JsValue> {
    let art = modules::require("art-template", context)?;
    let render = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(render_art), js_string!("art"), 2)
        .build();
    if let Some(art_object) = art.as_object() {
        let defaults = art_object.get(js_string!("defaults"), context)?;
        render.set(js_string!("defaults"), defaults, false, context)?;
    }
    Ok(render.into())
}

fn render_art(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let filename = args
        .first()
        .cloned()
        .unwrap_or_default()
        .to_string(context)?
        .to_std_string_escaped();
    let data = args.get(1).cloned().unwrap_or_default();

    let source = event_loop::with_state(|state| {
        let registry = state.registry.clone();
        registry
            .catalog
            .file(&filename, &registry)
            .map_err(|err| err.to_string())
    })
    .map_err(|err| JsNativeError::error().with_message(err))?;

    let art = modules::require("art-template", context)?;
    let Some(art) = art.as_object() else {
        return Err(JsNativeError::typ()
            .with_message("art-template export is not an object")
            .into());
    };
    let render = art.get(js_string!("render"), context)?;
    let Some(render) = render.as_callable() else {
        return Err(JsNativeError::typ()
            .with_message("art-template has no render function")
            .into());
    };
    let options = JsValue::from_json(
        &serde_json::json!({ "debug": false, "minimize": false }),
        context,
    )?;
    render.call(
        &JsValue::undefined(),
        &[boa_engine::JsString::from(source).into(), data, options],
        context,
    )
}
