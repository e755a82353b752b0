//! Single page GUI served at `/gui`

use axum::response::Html;

pub async fn page() -> Html<&'static str> {
    Html(PAGE)
}

/// Level selector, run button, results table and a JSON download link.
/// Talks to `POST /scrape` and `GET /api/stats`.
const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>CA Gov Ballot Measures</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 0; display: flex; min-height: 100vh; }
  aside { width: 260px; padding: 1.5rem; background: #f3f4f6; }
  main { flex: 1; padding: 1.5rem 2rem; }
  select, button { width: 100%; padding: .5rem; margin-top: .5rem; font-size: 1rem; }
  button { background: #2563eb; color: #fff; border: 0; border-radius: 4px; cursor: pointer; }
  button:disabled { background: #93c5fd; cursor: wait; }
  .metrics { display: flex; gap: 2rem; margin: 1rem 0; }
  .metric b { display: block; font-size: 1.6rem; }
  .error { color: #b91c1c; }
  .ok { color: #15803d; }
  table { border-collapse: collapse; width: 100%; font-size: .9rem; }
  th, td { border-bottom: 1px solid #e5e7eb; padding: .4rem; text-align: left; vertical-align: top; }
</style>
</head>
<body>
<aside>
  <h2>Configuration</h2>
  <label for="level">Government Level</label>
  <select id="level">
    <option value="state">State</option>
    <option value="county">County</option>
    <option value="city">City</option>
    <option value="all">All</option>
  </select>
  <button id="run">Run Scraper</button>
  <p id="message"></p>
</aside>
<main>
  <h1>California Government Ballot Measures</h1>
  <p><em>Monitor ballot measures across California government</em></p>
  <div class="metrics">
    <div class="metric"><b id="stored">-</b>Stored measures</div>
    <div class="metric"><b id="found">-</b>Measures found</div>
    <div class="metric"><b id="pages">-</b>Pages scraped</div>
  </div>
  <p><a id="download" hidden>Download JSON</a></p>
  <table id="results" hidden>
    <thead><tr><th>Year</th><th>Title</th><th>Election</th><th>PDF</th></tr></thead>
    <tbody></tbody>
  </table>
  <p id="hint">Choose a level and click <b>Run Scraper</b> to begin.</p>
</main>
<script>
const $ = (id) => document.getElementById(id);

function cell(text) {
  const td = document.createElement("td");
  td.textContent = text == null ? "" : text;
  return td;
}

async function loadStats() {
  try {
    const stats = await (await fetch("/api/stats")).json();
    $("stored").textContent = stats.total_measures;
  } catch (_) {}
}

function show(results) {
  $("found").textContent = results.measures.length;
  $("pages").textContent = results.pages.length;
  const body = $("results").querySelector("tbody");
  body.replaceChildren();
  for (const m of results.measures) {
    const row = document.createElement("tr");
    row.append(cell(m.year), cell(m.title), cell(m.election_date || m.election_type));
    const pdf = cell("");
    if (m.pdf_url) {
      const a = document.createElement("a");
      a.href = m.pdf_url;
      a.textContent = "PDF";
      pdf.append(a);
    }
    row.append(pdf);
    body.append(row);
  }
  $("results").hidden = results.measures.length === 0;

  const blob = new Blob([JSON.stringify(results, null, 2)], { type: "application/json" });
  const stamp = new Date().toISOString().slice(0, 16).replace(/[-:T]/g, "");
  const link = $("download");
  link.href = URL.createObjectURL(blob);
  link.download = `ballot_measures_${stamp}.json`;
  link.hidden = false;
  $("hint").hidden = true;
}

$("run").addEventListener("click", async () => {
  const button = $("run");
  const message = $("message");
  button.disabled = true;
  message.className = "";
  message.textContent = "Scraping data...";
  try {
    const response = await fetch("/scrape", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ level: $("level").value, output_format: "json" }),
    });
    const body = await response.json();
    if (body.status === "success") {
      message.className = "ok";
      message.textContent = "Scraping completed!";
      show(body.data);
    } else {
      message.className = "error";
      message.textContent = `Error: ${body.message}`;
    }
  } catch (err) {
    message.className = "error";
    message.textContent = `Error: ${err}`;
  } finally {
    button.disabled = false;
  }
});

loadStats();
</script>
</body>
</html>
"#;
