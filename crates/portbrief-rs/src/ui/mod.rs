pub async fn index() -> axum::response::Html<&'static str> {
    axum::response::Html(
        r#"
<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <meta name="viewport" content="width=device-width, initial-scale=1"/>
  <title>PortBrief</title>
  <style>
    :root {
      --bg: #0b1220;
      --card: #131d33;
      --line: #263551;
      --text: #e5ecff;
      --muted: #9eb0d6;
      --accent: #5cc8ff;
      --ok: #41d38a;
      --err: #ff7a7a;
    }
    * { box-sizing: border-box; }
    body {
      margin: 0;
      font-family: Inter, Segoe UI, Roboto, sans-serif;
      background: radial-gradient(circle at 15% -10%, #1f3566, var(--bg));
      color: var(--text);
    }
    .container { max-width: 560px; margin: 0 auto; padding: 48px 24px; }
    .card {
      background: color-mix(in oklab, var(--card) 94%, black);
      border: 1px solid var(--line);
      border-radius: 14px;
      padding: 24px;
      box-shadow: 0 10px 35px rgba(0,0,0,.18);
    }
    .title { margin: 0; font-size: 1.9rem; }
    .subtitle { margin: 8px 0 16px; color: var(--muted); }
    label { display: block; margin: 14px 0 6px; color: var(--muted); font-size: .9rem; }
    input, button {
      width: 100%; border-radius: 10px; border: 1px solid var(--line); background: #0d1629;
      color: var(--text); padding: 10px 12px;
    }
    button { margin-top: 20px; background: linear-gradient(90deg, #1b7cff, #2ca0ff); border: none; font-weight: 600; cursor: pointer; }
    button:disabled { opacity: .6; cursor: wait; }
    .status { margin-top: 14px; color: var(--muted); font-size: .9rem; min-height: 22px; }
    .status.ok { color: var(--ok); }
    .status.err { color: var(--err); }
  </style>
</head>
<body>
  <main class="container">
    <form class="card" id="scanForm">
      <h1 class="title">PortBrief</h1>
      <p class="subtitle">Request a port-exposure report for a domain you are authorized to test. The PDF is emailed to you.</p>
      <label for="domain">Domain</label><input id="domain" name="domain" placeholder="example.com" required/>
      <label for="email">Email</label><input id="email" name="email" type="email" placeholder="you@example.com" required/>
      <button id="submitBtn" type="submit">Request report</button>
      <div class="status" id="status"></div>
    </form>
  </main>

<script>
const form = document.getElementById('scanForm');
const statusEl = document.getElementById('status');
const submitBtn = document.getElementById('submitBtn');

const setStatus = (text, cls) => {
  statusEl.textContent = text;
  statusEl.className = `status ${cls || ''}`;
};

form.onsubmit = async (ev) => {
  ev.preventDefault();
  submitBtn.disabled = true;
  setStatus('Scanning, this can take several minutes...');
  try {
    const resp = await fetch('/api/scan', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({
        domain: document.getElementById('domain').value.trim(),
        email: document.getElementById('email').value.trim(),
      }),
    });
    const data = await resp.json().catch(() => ({}));
    if (!resp.ok) throw new Error(data.detail || `HTTP ${resp.status}`);
    setStatus(data.reused
      ? `A recent report for ${data.domain} was sent to ${data.email}.`
      : `A new report for ${data.domain} was sent to ${data.email}.`, 'ok');
  } catch (e) {
    setStatus(`Request failed: ${e.message}`, 'err');
  } finally {
    submitBtn.disabled = false;
  }
};
</script>
</body>
</html>
"#,
    )
}
