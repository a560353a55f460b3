//! Diagnostic JSON rendering of documents.
//!
//! Used by `Debug`/`Display` impls and the demo binary. The output follows
//! the relaxed extended-JSON conventions closely enough to be pasted into
//! other tools, but it is a debugging aid, not a canonical codec: malformed
//! documents render with an error marker instead of failing.

use base64::Engine;
use serde_json::{Value, json};

use super::raw::RawError;
use super::value::BsonValue;
use super::view::DocView;

/// Render a document as a JSON object.
pub fn doc_to_json(doc: DocView<'_>) -> Result<Value, RawError> {
    let mut map = serde_json::Map::new();
    for el in doc.iter() {
        let el = el?;
        map.insert(el.key().to_string(), value_to_json(el.value()?)?);
    }
    Ok(Value::Object(map))
}

/// Render an array document as a JSON array, discarding the index keys.
fn array_to_json(doc: DocView<'_>) -> Result<Value, RawError> {
    let mut items = Vec::new();
    for el in doc.iter() {
        let el = el?;
        items.push(value_to_json(el.value()?)?);
    }
    Ok(Value::Array(items))
}

fn value_to_json(value: BsonValue<'_>) -> Result<Value, RawError> {
    Ok(match value {
        BsonValue::Double(v) => json!(v),
        BsonValue::String(s) => json!(s),
        BsonValue::Document(d) => doc_to_json(d)?,
        BsonValue::Array(d) => array_to_json(d)?,
        BsonValue::Binary(b) => json!({
            "$binary": {
                "base64": base64::engine::general_purpose::STANDARD.encode(b.data),
                "subType": format!("{:02x}", b.subtype),
            }
        }),
        BsonValue::Undefined => json!({ "$undefined": true }),
        BsonValue::ObjectId(oid) => json!({ "$oid": oid.to_string() }),
        BsonValue::Boolean(v) => json!(v),
        BsonValue::DateTime(ms) => json!({ "$date": ms }),
        BsonValue::Null => Value::Null,
        BsonValue::Regex(re) => json!({
            "$regularExpression": { "pattern": re.pattern, "options": re.options }
        }),
        BsonValue::DbPointer(p) => json!({
            "$dbPointer": { "$ref": p.namespace, "$id": p.id.to_string() }
        }),
        BsonValue::JavaScript(code) => json!({ "$code": code }),
        BsonValue::Symbol(s) => json!({ "$symbol": s }),
        BsonValue::JavaScriptWithScope(cs) => json!({
            "$code": cs.code,
            "$scope": doc_to_json(cs.scope)?,
        }),
        BsonValue::Int32(v) => json!(v),
        BsonValue::Timestamp(ts) => json!({
            "$timestamp": { "t": ts.time, "i": ts.increment }
        }),
        BsonValue::Int64(v) => json!(v),
        BsonValue::Decimal128(d) => {
            let hex: String = d.bytes().iter().map(|b| format!("{b:02x}")).collect();
            json!({ "$decimal128Bytes": hex })
        }
        BsonValue::MinKey => json!({ "$minKey": 1 }),
        BsonValue::MaxKey => json!({ "$maxKey": 1 }),
    })
}

/// Formatter shared by the `Debug`/`Display` impls of the document types.
pub(crate) fn fmt_doc(doc: DocView<'_>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match doc_to_json(doc) {
        Ok(v) => write!(f, "{v}"),
        Err(err) => write!(f, "<malformed document: {err}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::DocBuf;

    #[test]
    fn renders_scalars_and_nesting() {
        let mut doc = DocBuf::new();
        {
            let mut m = doc.mutate();
            m.append_str("name", "ada").unwrap();
            m.append_int32("n", 3).unwrap();
            let pos = m.append_doc("inner", DocView::empty()).unwrap();
            let mut child = m.child_at(pos).unwrap();
            child.append_bool("ok", true).unwrap();
        }
        let v = doc_to_json(doc.as_view()).unwrap();
        assert_eq!(v["name"], "ada");
        assert_eq!(v["n"], 3);
        assert_eq!(v["inner"]["ok"], true);
    }

    #[test]
    fn arrays_drop_their_index_keys() {
        let mut doc = DocBuf::new();
        {
            let mut m = doc.mutate();
            let pos = m.append_array("xs", DocView::empty()).unwrap();
            let mut arr = m.child_at(pos).unwrap();
            arr.append_int32("0", 1).unwrap();
            arr.append_int32("1", 2).unwrap();
        }
        let v = doc_to_json(doc.as_view()).unwrap();
        assert_eq!(v["xs"], serde_json::json!([1, 2]));
    }

    #[test]
    fn display_of_malformed_document_does_not_panic() {
        // Valid framing, invalid element tag.
        let bytes = [8u8, 0, 0, 0, 0x20, b'k', 0, 0];
        let view = DocView::parse(&bytes).unwrap();
        let rendered = format!("{view}");
        assert!(rendered.contains("malformed"));
    }
}
