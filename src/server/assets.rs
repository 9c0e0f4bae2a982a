//! Static operator console assets, served as fixed bytes.

pub const CONSOLE_HTML: &str = r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Vigil · Live Console</title>
    <link rel="stylesheet" href="/console.css" />
  </head>
  <body>
    <header>
      <div class="title">Vigil · Live Console</div>
      <div class="controls">
        <button id="pauseBtn">Pause</button>
        <button id="clearBtn">Clear</button>
        <input id="filter" placeholder="Filter (type: log|file|hit, path, rule)" />
      </div>
    </header>
    <main id="log"></main>
    <script src="/console.js"></script>
  </body>
</html>
"#;

pub const CONSOLE_CSS: &str = r#":root { --bg:#0f1115; --panel:#151924; --fg:#e5e7eb; --muted:#9aa0a6; --ok:#34d399; --warn:#f59e0b; --err:#ef4444; --acc:#5eead4; }
*{box-sizing:border-box} body{margin:0;background:var(--bg);color:var(--fg);font:14px/1.5 ui-monospace, SFMono-Regular, Menlo, Consolas, monospace}
header{position:sticky;top:0;background:linear-gradient(180deg,var(--panel),rgba(21,25,36,0.6));border-bottom:1px solid rgba(255,255,255,0.06);display:flex;gap:16px;align-items:center;justify-content:space-between;padding:10px 12px}
.title{font-weight:700;letter-spacing:.3px}
.controls{display:flex;gap:8px;align-items:center}
button{background:rgba(94,234,212,.12);color:var(--fg);border:1px solid rgba(94,234,212,.4);padding:6px 10px;border-radius:8px;cursor:pointer}
input{background:rgba(255,255,255,.06);color:var(--fg);border:1px solid rgba(255,255,255,.12);border-radius:8px;padding:6px 8px;min-width:280px}
main{padding:10px 12px}
.row{display:flex;gap:10px;align-items:flex-start;padding:6px 8px;border-bottom:1px solid rgba(255,255,255,.06)}
.badge{padding:2px 6px;border-radius:6px;font-weight:700;min-width:44px;text-align:center}
.file{background:rgba(52,211,153,.15);border:1px solid rgba(52,211,153,.5)}
.log{background:rgba(94,234,212,.12);border:1px solid rgba(94,234,212,.4)}
.hit{background:rgba(245,158,11,.12);border:1px solid rgba(245,158,11,.5)}
.meta{color:var(--muted)}
.jsonbtn{margin-left:auto}
details{margin-left:auto}
pre{white-space:pre-wrap;word-break:break-word}
"#;

pub const CONSOLE_JS: &str = r#"(function(){
  const log = document.getElementById('log');
  const pauseBtn = document.getElementById('pauseBtn');
  const clearBtn = document.getElementById('clearBtn');
  const filter = document.getElementById('filter');
  let paused = false;
  let filterTxt = '';

  function row(kind, text, json){
    if(filterTxt){
      const ft = filterTxt.toLowerCase();
      const hay = (text + ' ' + JSON.stringify(json)).toLowerCase();
      if(!hay.includes(ft)) return;
    }
    const div = document.createElement('div');
    div.className = 'row';
    const badge = document.createElement('span');
    badge.className = 'badge ' + kind;
    badge.textContent = kind.toUpperCase();
    const span = document.createElement('span');
    span.textContent = text;
    const det = document.createElement('details');
    const sum = document.createElement('summary');
    sum.textContent = '{ }';
    sum.className = 'jsonbtn';
    const pre = document.createElement('pre');
    pre.textContent = JSON.stringify(json, null, 2);
    det.appendChild(sum); det.appendChild(pre);
    div.appendChild(badge); div.appendChild(span); div.appendChild(det);
    log.appendChild(div);
    window.requestAnimationFrame(()=>{ window.scrollTo(0, document.body.scrollHeight); });
  }

  pauseBtn.onclick = ()=>{ paused = !paused; pauseBtn.textContent = paused? 'Resume' : 'Pause'; };
  clearBtn.onclick = ()=>{ log.innerHTML=''; };
  filter.oninput = ()=>{ filterTxt = filter.value.trim(); };

  const es = new EventSource('/stream');
  es.onmessage = (ev)=>{
    if(paused) return;
    try{
      const obj = JSON.parse(ev.data);
      if(!obj || !obj.type) return;
      if(obj.type === 'file_event' || obj.type === 'dir_event'){
        row('file', `${obj.kind} ${obj.path}`, obj);
      } else if(obj.type === 'log_line'){
        row('log', `${obj.path} :: ${obj.line}`, obj);
      } else if(obj.type === 'rule_hit'){
        const sim = obj.similarity != null ? ` sim=${obj.similarity}` : '';
        row('hit', `${obj.rule}${sim} :: ${obj.path}`, obj);
      } else if(obj.type === 'file_stats'){
        row('file', `Δlines=${obj.delta_lines} rate_5m=${obj.rate_5m} accel_5m=${obj.accel_5m} :: ${obj.path}`, obj);
      }
    }catch(e){}
  };
})();
"#;
