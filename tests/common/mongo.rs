//! An in-process OP_MSG server for end-to-end tests.
//!
//! Speaks just enough of the command protocol to exercise the client:
//! `hello`, `ping`, `insert`, `find`/`getMore`/`killCursors`, plus two
//! synthetic commands: `fail` (replies `ok: 0, code: 50`) and `slow`
//! (never replies in time), used by the error- and timeout-path tests.

use std::net::SocketAddr;
use std::time::Duration;

use monoxide::bson::{DocBuf, DocView};
use monoxide::wire::{MessageHeader, decode_op_msg, encode_op_msg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub async fn spawn_mock_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(sock));
        }
    });
    (addr, handle)
}

async fn serve_connection(mut sock: TcpStream) {
    let mut server_request_id = 1000;
    loop {
        let mut header = [0u8; 16];
        if sock.read_exact(&mut header).await.is_err() {
            return;
        }
        let hdr = MessageHeader::parse(&header).expect("client sent a bad header");
        let mut body = vec![0u8; hdr.message_length as usize - 16];
        sock.read_exact(&mut body).await.expect("truncated request");
        let (_flags, cmd) = decode_op_msg(&body).expect("client sent a bad body");

        let reply = respond(cmd.as_view()).await;
        let msg = encode_op_msg(reply.as_view(), server_request_id, hdr.request_id)
            .expect("reply must encode");
        server_request_id += 1;
        if sock.write_all(&msg).await.is_err() {
            return;
        }
    }
}

async fn respond(cmd: DocView<'_>) -> DocBuf {
    let first = cmd
        .iter()
        .next()
        .expect("command document is empty")
        .expect("command document is malformed");
    let db = cmd.get_str("$db").unwrap_or("test").to_string();
    match first.key() {
        "hello" => {
            let mut reply = DocBuf::new();
            let mut m = reply.mutate();
            m.append_double("ok", 1.0).unwrap();
            m.append_int32("maxWireVersion", 17).unwrap();
            m.append_bool("isWritablePrimary", true).unwrap();
            drop(m);
            reply
        }
        "ping" => ok_reply(),
        "insert" => {
            let n = cmd
                .get_array("documents")
                .map(|docs| docs.iter().count() as i32)
                .unwrap_or(0);
            let mut reply = DocBuf::new();
            let mut m = reply.mutate();
            m.append_double("ok", 1.0).unwrap();
            m.append_int32("n", n).unwrap();
            drop(m);
            reply
        }
        "find" => {
            let coll = first.value().unwrap();
            let coll = match coll {
                monoxide::bson::BsonValue::String(s) => s,
                _ => "things",
            };
            cursor_reply(&db, coll, 99, "firstBatch", &[0, 1])
        }
        "getMore" => {
            let coll = cmd.get_str("collection").unwrap_or("things");
            cursor_reply(&db, coll, 0, "nextBatch", &[2])
        }
        "update" => {
            let n = cmd
                .get_array("updates")
                .map(|u| u.iter().count() as i32)
                .unwrap_or(0);
            let mut reply = DocBuf::new();
            let mut m = reply.mutate();
            m.append_double("ok", 1.0).unwrap();
            m.append_int32("n", n).unwrap();
            m.append_int32("nModified", n).unwrap();
            drop(m);
            reply
        }
        "aggregate" => {
            let coll = match first.value().unwrap() {
                monoxide::bson::BsonValue::String(s) => s,
                _ => "things",
            };
            cursor_reply(&db, coll, 0, "firstBatch", &[7])
        }
        "killCursors" => ok_reply(),
        "fail" => {
            let mut reply = DocBuf::new();
            let mut m = reply.mutate();
            m.append_double("ok", 0.0).unwrap();
            m.append_int32("code", 50).unwrap();
            m.append_str("errmsg", "timed out").unwrap();
            drop(m);
            reply
        }
        "slow" => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ok_reply()
        }
        _ => {
            let mut reply = DocBuf::new();
            let mut m = reply.mutate();
            m.append_double("ok", 0.0).unwrap();
            m.append_int32("code", 59).unwrap();
            m.append_str("errmsg", "no such command").unwrap();
            drop(m);
            reply
        }
    }
}

fn ok_reply() -> DocBuf {
    let mut reply = DocBuf::new();
    reply.mutate().append_double("ok", 1.0).unwrap();
    reply
}

/// A cursor-shaped reply whose batch holds `{"i": <n>}` documents.
fn cursor_reply(db: &str, coll: &str, cursor_id: i64, batch_key: &str, items: &[i32]) -> DocBuf {
    let mut reply = DocBuf::new();
    {
        let mut m = reply.mutate();
        let cursor_pos = m.append_doc("cursor", DocView::empty()).unwrap();
        let mut cursor = m.child_at(cursor_pos).unwrap();
        cursor.append_int64("id", cursor_id).unwrap();
        cursor
            .append_str("ns", &format!("{db}.{coll}"))
            .unwrap();
        let batch_pos = cursor.append_array(batch_key, DocView::empty()).unwrap();
        let mut batch = cursor.child_at(batch_pos).unwrap();
        for (idx, item) in items.iter().enumerate() {
            let mut doc = DocBuf::new();
            doc.mutate().append_int32("i", *item).unwrap();
            let at = batch.end_pos();
            batch
                .insert_doc(at, &idx.to_string(), doc.as_view())
                .unwrap();
        }
    }
    reply.mutate().append_double("ok", 1.0).unwrap();
    reply
}
