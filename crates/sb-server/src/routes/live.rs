//! Live console: a minimal HTML page showing the message flow
//!
//! Opens an SSE stream (auto-creating its own session), picks the POST URL
//! out of the endpoint event, and lets you submit raw JSON-RPC bodies.

use axum::response::{Html, IntoResponse, Response};

#[utoipa::path(
    get,
    path = "/live",
    tag = "bridge",
    responses((status = 200, description = "Live console", content_type = "text/html"))
)]
pub async fn live_console() -> Response {
    Html(LIVE_HTML).into_response()
}

const LIVE_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>stdio-bridge live</title></head>
<body style="font-family: system-ui, sans-serif; margin: 1rem;">
<h1>Live stream</h1>
<p id="status">connecting…</p>
<pre id="log" style="border:1px solid #ccc; padding:1rem; height:50vh; overflow:auto; background:#fafafa"></pre>
<form id="f" style="margin-top:1rem">
  <textarea id="payload" rows="6" style="width:100%" placeholder='{"jsonrpc":"2.0","method":"ping","id":"1"}'></textarea>
  <button>Send</button>
</form>
<script>
  const log = document.getElementById('log');
  const status = document.getElementById('status');
  let postUrl = null;
  function append(x) { log.textContent += x + "\n"; log.scrollTop = log.scrollHeight; }
  const es = new EventSource('/sse');
  es.addEventListener('endpoint', (e) => {
    postUrl = e.data;
    status.textContent = 'connected, posting to ' + postUrl;
  });
  es.addEventListener('message', (e) => append(e.data));
  es.addEventListener('end', (e) => { append('[session ended: ' + e.data + ']'); es.close(); });
  es.onerror = () => append('[SSE error]');
  document.getElementById('f').addEventListener('submit', async (ev) => {
    ev.preventDefault();
    if (!postUrl) { append('[not connected yet]'); return; }
    const t = document.getElementById('payload').value || '{}';
    try { JSON.parse(t); } catch { append('[Invalid JSON]'); return; }
    await fetch(postUrl, {method:'POST', headers:{'content-type':'application/json'}, body:t});
    append('> ' + t);
  });
</script>
</body>
</html>"#;
