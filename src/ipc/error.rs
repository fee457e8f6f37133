use serde::Serialize;
use serde_json::json;

#[derive(Debug, Serialize)]
struct OkResp<'a> {
    id: &'a str,
    ok: bool,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrObj {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ErrResp<'a> {
    id: &'a str,
    ok: bool,
    error: ErrObj,
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!(OkResp {
        id,
        ok: true,
        result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    json!(ErrResp {
        id,
        ok: false,
        error: ErrObj {
            code: code.to_string(),
            message: message.into(),
            details,
        },
    })
}
