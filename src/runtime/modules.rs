//! CommonJS-style module loading. Resolution order: relative paths
//! against the requiring module's directory, `node:` stripped, the
//! `@/` bundled utility library, bundled third-party sources by
//! basename, remote catalog modules, then native shims.

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, Source};

use super::{event_loop, shims};

/// Bundled utility modules, stored in the IIFE form
/// `;(exports, require, module) => { ... }`.
static BUNDLED: &[(&str, &str)] = &[
    ("@/utils/got", include_str!("js/got.js")),
    ("@/utils/ofetch", include_str!("js/ofetch.js")),
];

/// Bundled third-party libraries keyed by basename. The loader
/// contract is fixed; the inventory grows by dropping a file next to
/// the others and listing it here.
static THIRD_PARTY: &[(&str, &str)] = &[];

pub fn js_require(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = args
        .first()
        .cloned()
        .unwrap_or_default()
        .to_string(context)?
        .to_std_string_escaped();
    require(&name, context)
}

pub fn require(name: &str, context: &mut Context) -> JsResult<JsValue> {
    let resolved = event_loop::with_state(|state| resolve(name, &state.dir_stack));

    if let Some(found) = event_loop::with_state(|state| state.modules.get(&resolved).cloned()) {
        return Ok(found);
    }

    let exports = load(&resolved, context)?;
    event_loop::with_state(|state| {
        state.modules.insert(resolved, exports.clone());
    });
    Ok(exports)
}

fn load(resolved: &str, context: &mut Context) -> JsResult<JsValue> {
    if resolved.starts_with('/') {
        return load_remote(resolved, context);
    }

    if let Some((_, source)) = BUNDLED.iter().find(|(name, _)| *name == resolved) {
        return load_iife(source, context);
    }
    let basename = resolved.rsplit('/').next().unwrap_or(resolved);
    if let Some((_, source)) = THIRD_PARTY.iter().find(|(name, _)| *name == basename) {
        return load_iife(source, context);
    }

    if let Some(class_name) = error_class_name(resolved) {
        let source = format!("(class extends Error {{ name = '{class_name}' }})");
        return context.eval(Source::from_bytes(source.as_bytes()));
    }

    if let Some(exports) = shims::load(resolved, context)? {
        return Ok(exports);
    }

    Err(JsNativeError::typ()
        .with_message(format!("require {resolved}: no such module"))
        .into())
}

/// Remote catalog module: fetch + transpile (cached), then execute the
/// CommonJS IIFE with the module's directory on the resolution stack.
fn load_remote(path: &str, context: &mut Context) -> JsResult<JsValue> {
    let source = event_loop::with_state(|state| {
        let registry = state.registry.clone();
        registry
            .catalog
            .module_source(path, &registry)
            .map_err(|err| err.to_string())
    })
    .map_err(|err| JsNativeError::error().with_message(err))?;

    event_loop::with_state(|state| state.dir_stack.push(parent_dir(path)));
    let result = load_iife(&source, context);
    event_loop::with_state(|state| {
        state.dir_stack.pop();
    });
    let exports = result?;

    if path == "/lib/config.ts" {
        patch_config(&exports, context)?;
    }
    Ok(exports)
}

/// Evaluates an IIFE-shaped module source and returns its exports.
fn load_iife(source: &str, context: &mut Context) -> JsResult<JsValue> {
    let function = context.eval(Source::from_bytes(source))?;
    let Some(function) = function.as_callable() else {
        return Err(JsNativeError::typ()
            .with_message("module source did not evaluate to a function")
            .into());
    };

    let exports = ObjectInitializer::new(context).build();
    let module = ObjectInitializer::new(context)
        .property(js_string!("exports"), exports.clone(), Attribute::all())
        .build();
    let require_fn = context
        .global_object()
        .get(js_string!("require"), context)?;

    function.call(
        &JsValue::from(exports.clone()),
        &[exports.into(), require_fn, module.clone().into()],
        context,
    )?;
    module.get(js_string!("exports"), context)
}

/// The upstream config module expects a populated runtime config;
/// pin the cache TTLs and the UA, and allow user-supplied domains.
fn patch_config(exports: &JsValue, context: &mut Context) -> JsResult<()> {
    let Some(exports) = exports.as_object() else {
        return Ok(());
    };
    let config = exports.get(js_string!("config"), context)?;
    let Some(config) = config.as_object() else {
        return Ok(());
    };
    if let Some(cache) = config.get(js_string!("cache"), context)?.as_object() {
        cache.set(
            js_string!("routeExpire"),
            JsValue::from(super::ROUTE_EXPIRE.as_secs() as u32),
            false,
            context,
        )?;
        cache.set(
            js_string!("contentExpire"),
            JsValue::from(super::CONTENT_EXPIRE.as_secs() as u32),
            false,
            context,
        )?;
    }
    if let Some(feature) = config.get(js_string!("feature"), context)?.as_object() {
        feature.set(
            js_string!("allow_user_supply_unsafe_domain"),
            JsValue::from(true),
            false,
            context,
        )?;
    }
    config.set(
        js_string!("ua"),
        JsValue::from(boa_engine::JsString::from(super::user_agent())),
        false,
        context,
    )?;
    Ok(())
}

/// `@/errors/types/not-found` synthesizes `NotFoundError`.
fn error_class_name(resolved: &str) -> Option<String> {
    let rest = resolved.strip_prefix("@/errors/types/")?;
    let mut name = String::new();
    for word in rest.split('-') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name.push_str("Error");
    Some(name)
}

pub fn resolve(name: &str, dir_stack: &[String]) -> String {
    if name.starts_with("./") || name.starts_with("../") {
        let dir = dir_stack
            .last()
            .map(String::as_str)
            .unwrap_or("/lib/routes");
        return format!("{}.ts", normalize_path(&format!("{dir}/{name}")));
    }
    if let Some(rest) = name.strip_prefix("node:") {
        return rest.to_string();
    }
    if name == "@/config" {
        return "/lib/config.ts".to_string();
    }
    name.to_string()
}

pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_resolve_against_the_requiring_dir() {
        let stack = vec!["/lib/routes/example".to_string()];
        assert_eq!(resolve("./utils", &stack), "/lib/routes/example/utils.ts");
        assert_eq!(resolve("../shared", &stack), "/lib/routes/shared.ts");
        assert_eq!(resolve("./a", &[]), "/lib/routes/a.ts");
    }

    #[test]
    fn node_prefix_is_stripped() {
        assert_eq!(resolve("node:path", &[]), "path");
    }

    #[test]
    fn config_alias() {
        assert_eq!(resolve("@/config", &[]), "/lib/config.ts");
    }

    #[test]
    fn error_class_names() {
        assert_eq!(
            error_class_name("@/errors/types/not-found").as_deref(),
            Some("NotFoundError")
        );
        assert_eq!(
            error_class_name("@/errors/types/invalid-parameter").as_deref(),
            Some("InvalidParameterError")
        );
        assert_eq!(error_class_name("@/utils/md5"), None);
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("/lib/routes/ns/./x"), "/lib/routes/ns/x");
        assert_eq!(normalize_path("/lib/routes/ns/../x"), "/lib/routes/x");
        assert_eq!(parent_dir("/lib/routes/ns/x.ts"), "/lib/routes/ns");
    }
}
