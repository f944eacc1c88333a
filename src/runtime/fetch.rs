//! The `$fetch` host function backing all three script HTTP call
//! styles (ofetch plain, ofetch raw, got). Requests run on the shared
//! fetcher with its retry policy; responses come back through the
//! loop as completions.

use boa_engine::object::builtins::{JsPromise, JsUint8Array};
use boa_engine::property::Attribute;
use boa_engine::object::ObjectInitializer;
use boa_engine::{js_string, Context, JsNativeError, JsObject, JsResult, JsValue};
use reqwest::Method;
use url::Url;

use super::event_loop::{self, Completion, IoPayload, PayloadKind, PendingPromise};
use crate::fetch::{decode_bytes, FetchRequest, Page};

const RESPONSE_TYPES: &[&str] = &["", "json", "text", "buffer", "arrayBuffer", "blob", "stream"];

pub fn js_fetch(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let opts = args.first().cloned().unwrap_or_default();
    let request = match build_request(&opts, context) {
        Ok(request) => request,
        Err(err) => return Err(err),
    };

    let (id, completions, registry) = event_loop::with_state(|state| {
        let id = state.next_id();
        state.pending_io += 1;
        (id, state.completions.clone(), state.registry.clone())
    });

    let ScriptRequest {
        inner,
        response_type,
        encoding,
    } = request;
    let promise = JsPromise::new(
        move |resolvers, _context| {
            event_loop::with_state(|state| {
                state.resolvers.insert(
                    id,
                    PendingPromise {
                        resolve: resolvers.resolve.clone(),
                        reject: resolvers.reject.clone(),
                        kind: PayloadKind::Fetch {
                            response_type,
                            encoding,
                        },
                    },
                );
            });
            Ok(JsValue::undefined())
        },
        context,
    );

    let fetcher = registry.fetcher.clone();
    registry.handle.spawn(async move {
        let result = fetcher
            .execute(&inner)
            .await
            .map(IoPayload::Page)
            .map_err(|err| err.to_string());
        let _ = completions.send(Completion::Io(id, result));
    });

    Ok(promise.into())
}

struct ScriptRequest {
    inner: FetchRequest,
    response_type: String,
    encoding: String,
}

fn rule_error(message: impl Into<String>) -> boa_engine::JsError {
    JsNativeError::error().with_message(message.into()).into()
}

fn build_request(opts: &JsValue, context: &mut Context) -> JsResult<ScriptRequest> {
    // A bare string is shorthand for `{ url }`.
    if opts.is_string() {
        let url = opts.to_string(context)?.to_std_string_escaped();
        return Ok(ScriptRequest {
            inner: FetchRequest::get(&url),
            response_type: String::new(),
            encoding: String::new(),
        });
    }
    let Some(opts) = opts.as_object() else {
        return Err(rule_error("fetch: options must be a string or object"));
    };

    let mut url = get_string(opts, "url", context)?.unwrap_or_default();

    if let Some(base) = get_string(opts, "baseURL", context)? {
        let base = Url::parse(&base).map_err(|err| rule_error(format!("baseURL: {err}")))?;
        url = base
            .join(&url)
            .map_err(|err| rule_error(format!("url: {err}")))?
            .to_string();
    }

    let method = match get_string(opts, "method", context)? {
        None => Method::GET,
        Some(m) if m.is_empty() => Method::GET,
        Some(m) => match m.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => return Err(rule_error(format!("invalid method {other}"))),
        },
    };

    let query = opts.get(js_string!("query"), context)?;
    if !query.is_null_or_undefined() {
        let mut parsed =
            Url::parse(&url).map_err(|err| rule_error(format!("url: {err}")))?;
        if query.is_string() {
            let raw = query.to_string(context)?.to_std_string_escaped();
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
                parsed.query_pairs_mut().append_pair(&key, &value);
            }
        } else if let Some(map) = query.as_object() {
            for (key, value) in string_entries(map, context)
                .map_err(|_| rule_error("invalid query parameter"))?
            {
                parsed.query_pairs_mut().append_pair(&key, &value);
            }
        } else {
            return Err(rule_error("invalid query parameter"));
        }
        url = parsed.to_string();
    }

    let mut inner = FetchRequest {
        method,
        url,
        headers: Vec::new(),
        body: None,
    };

    let body = opts.get(js_string!("body"), context)?;
    if !body.is_null_or_undefined() {
        inner.body = Some(body.to_string(context)?.to_std_string_escaped().into_bytes());
    }

    let json = opts.get(js_string!("json"), context)?;
    if !json.is_null_or_undefined() {
        let json = json
            .to_json(context)
            .map_err(|err| rule_error(format!("json body: {err}")))?;
        inner
            .headers
            .push(("content-type".into(), "application/json".into()));
        inner.body = Some(serde_json::to_vec(&json).unwrap_or_default());
    }

    let headers = opts.get(js_string!("headers"), context)?;
    if !headers.is_null_or_undefined() {
        let Some(map) = headers.as_object() else {
            return Err(rule_error("invalid headers"));
        };
        let entries = string_entries(map, context).map_err(|_| rule_error("invalid headers"))?;
        inner.headers.extend(entries);
    }

    let form = opts.get(js_string!("form"), context)?;
    if !form.is_null_or_undefined() {
        let Some(map) = form.as_object() else {
            return Err(rule_error("invalid form data"));
        };
        let entries = string_entries(map, context).map_err(|_| rule_error("invalid form data"))?;
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in entries {
            serializer.append_pair(&key, &value);
        }
        inner.headers.push((
            "content-type".into(),
            "application/x-www-form-urlencoded".into(),
        ));
        inner.body = Some(serializer.finish().into_bytes());
    }

    let response_type = get_string(opts, "responseType", context)?.unwrap_or_default();
    match response_type.as_str() {
        "blob" | "stream" => return Err(rule_error("unsupported response type")),
        other if !RESPONSE_TYPES.contains(&other) => {
            return Err(rule_error("unknown response type"))
        }
        _ => {}
    }
    let encoding = get_string(opts, "encoding", context)?.unwrap_or_default();

    Ok(ScriptRequest {
        inner,
        response_type,
        encoding,
    })
}

fn get_string(obj: &JsObject, key: &str, context: &mut Context) -> JsResult<Option<String>> {
    let value = obj.get(boa_engine::JsString::from(key), context)?;
    if value.is_null_or_undefined() {
        return Ok(None);
    }
    Ok(Some(value.to_string(context)?.to_std_string_escaped()))
}

/// Own-enumerable entries of a plain object coerced to strings.
fn string_entries(obj: &JsObject, context: &mut Context) -> JsResult<Vec<(String, String)>> {
    use boa_engine::property::PropertyKey;

    let mut entries = Vec::new();
    let keys = obj.own_property_keys(context)?;
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };
        let value = obj.get(key, context)?;
        if value.is_null_or_undefined() {
            continue;
        }
        if value.as_object().is_some() && !value.is_string() {
            // Nested objects are not valid header/query values.
            return Err(JsNativeError::typ().with_message("non-scalar value").into());
        }
        entries.push((name, value.to_string(context)?.to_std_string_escaped()));
    }
    Ok(entries)
}

/// Turns a completed payload into the value the pending promise
/// resolves with.
pub fn payload_to_value(
    payload: IoPayload,
    kind: &PayloadKind,
    context: &mut Context,
) -> Result<JsValue, String> {
    match (payload, kind) {
        (IoPayload::Bytes(bytes), PayloadKind::CacheValue) => {
            // Cached bytes are JSON when the producer stored JSON;
            // anything else comes back as a string.
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(json) => JsValue::from_json(&json, context).map_err(|err| err.to_string()),
                Err(_) => Ok(boa_engine::JsString::from(String::from_utf8_lossy(&bytes).into_owned()).into()),
            }
        }
        (
            IoPayload::Page(page),
            PayloadKind::Fetch {
                response_type,
                encoding,
            },
        ) => build_response(page, response_type, encoding, context),
        _ => Err("mismatched io payload".to_string()),
    }
}

fn build_response(
    page: Page,
    response_type: &str,
    encoding: &str,
    context: &mut Context,
) -> Result<JsValue, String> {
    let decoded = || {
        if encoding.is_empty() {
            page.text()
        } else {
            decode_bytes(&page.bytes, Some(encoding))
        }
    };

    let (body, data): (JsValue, JsValue) = match response_type {
        "buffer" | "arrayBuffer" => {
            let array = JsUint8Array::from_iter(page.bytes.iter().copied(), context)
                .map_err(|err| err.to_string())?;
            (array.clone().into(), array.into())
        }
        "text" => {
            let text: JsValue = boa_engine::JsString::from(decoded()).into();
            (text.clone(), text)
        }
        "json" => {
            if page.bytes.is_empty() {
                (js_string!("").into(), js_string!("").into())
            } else {
                let parsed: serde_json::Value =
                    serde_json::from_str(&decoded()).map_err(|err| err.to_string())?;
                let value = JsValue::from_json(&parsed, context).map_err(|err| err.to_string())?;
                (value.clone(), value)
            }
        }
        _ => {
            let text = decoded();
            let body: JsValue = boa_engine::JsString::from(text.clone()).into();
            let data = match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(parsed) => {
                    JsValue::from_json(&parsed, context).map_err(|err| err.to_string())?
                }
                Err(_) => body.clone(),
            };
            (body, data)
        }
    };

    let headers = wrap_headers(&page, context)?;

    let response = ObjectInitializer::new(context)
        .property(js_string!("url"), js_string!(page.url.clone()), Attribute::all())
        .property(js_string!("body"), body, Attribute::all())
        .property(js_string!("data"), data.clone(), Attribute::all())
        .property(js_string!("_data"), data, Attribute::all())
        .property(js_string!("headers"), headers, Attribute::all())
        .build();
    Ok(response.into())
}

/// Headers become an object with `get(name)` and `getSetCookie()`,
/// built by the polyfill helper so the lookup logic lives in JS.
fn wrap_headers(page: &Page, context: &mut Context) -> Result<JsValue, String> {
    let entries: Vec<(String, String)> = page.headers.clone();
    let entries_json = serde_json::json!(entries);
    let entries_value =
        JsValue::from_json(&entries_json, context).map_err(|err| err.to_string())?;

    let wrap = context
        .global_object()
        .get(js_string!("__wrapHeaders"), context)
        .map_err(|err| err.to_string())?;
    let Some(wrap) = wrap.as_callable() else {
        return Err("polyfill missing __wrapHeaders".to_string());
    };
    wrap.call(&JsValue::undefined(), &[entries_value], context)
        .map_err(|err| err.to_string())
}
