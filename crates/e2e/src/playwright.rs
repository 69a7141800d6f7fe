//! Playwright browser automation
//!
//! One long-lived Node process hosts the browser. Requests and replies are
//! JSON lines over its stdin/stdout, matched by id, so any number of pages
//! (one browser context each) can be driven concurrently through it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{Browser, HarnessConfig};
use crate::driver::{Driver, Locator, Page, Viewport};
use crate::error::{E2eError, E2eResult};

const BRIDGE_JS: &str = r#"
const readline = require('readline');
const pw = require(require.resolve('playwright', { paths: [process.cwd()] }));

const browserType = pw[process.env.PW_BROWSER || 'chromium'];
const headless = process.env.PW_HEADLESS !== '0';
let browser = null;
const pages = new Map();
let nextPage = 1;

function locate(page, loc) {
  const root = loc.scope ? page.locator(loc.scope) : page;
  const q = loc.query;
  if (q.role) {
    const opts = q.role.name ? { name: q.role.name, exact: true } : {};
    return root.getByRole(q.role.role, opts);
  }
  if (q.text) return root.getByText(q.text.text, { exact: q.text.exact });
  if (q.placeholder) return root.getByPlaceholder(q.placeholder.text, { exact: true });
  return root.locator(q.selector.css);
}

function nth(entry, args) {
  return locate(entry.page, args.locator).nth(args.index);
}

async function handle(req) {
  const args = req.args || {};
  if (req.op === 'open') {
    if (!browser) browser = await browserType.launch({ headless });
    const context = await browser.newContext({ viewport: args.viewport });
    const page = await context.newPage();
    const id = nextPage++;
    pages.set(id, { context, page });
    return id;
  }
  if (req.op === 'shutdown') {
    if (browser) await browser.close();
    browser = null;
    setImmediate(() => process.exit(0));
    return null;
  }
  const entry = pages.get(req.page);
  if (!entry) throw new Error(`unknown page ${req.page}`);
  switch (req.op) {
    case 'goto':
      await entry.page.goto(args.url, { timeout: args.timeout_ms, waitUntil: 'domcontentloaded' });
      return null;
    case 'count':
      return await locate(entry.page, args.locator).count();
    case 'visible':
      return await nth(entry, args).isVisible();
    case 'click':
      await nth(entry, args).click({ timeout: args.timeout_ms });
      return null;
    case 'fill':
      await nth(entry, args).fill(args.text, { timeout: args.timeout_ms });
      return null;
    case 'files':
      await nth(entry, args).setInputFiles(args.path, { timeout: args.timeout_ms });
      return null;
    case 'press':
      if (args.locator) await nth(entry, args).press(args.key, { timeout: args.timeout_ms });
      else await entry.page.keyboard.press(args.key);
      return null;
    case 'viewport':
      await entry.page.setViewportSize(args.viewport);
      return null;
    case 'offline':
      await entry.context.setOffline(args.offline);
      return null;
    case 'screenshot':
      return (await entry.page.screenshot()).toString('base64');
    case 'close':
      pages.delete(req.page);
      await entry.context.close();
      return null;
    default:
      throw new Error(`unknown op ${req.op}`);
  }
}

const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

readline.createInterface({ input: process.stdin })
  .on('line', (line) => {
    let req;
    try {
      req = JSON.parse(line);
    } catch (e) {
      console.error(`bad request: ${line}`);
      return;
    }
    handle(req).then(
      (value) => reply({ id: req.id, ok: true, value: value === undefined ? null : value }),
      (err) => reply({ id: req.id, ok: false, error: String((err && err.message) || err) }),
    );
  })
  .on('close', async () => {
    if (browser) await browser.close();
    process.exit(0);
  });
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    /// Node executable
    pub node: PathBuf,
    /// Directory whose `node_modules` provides `playwright`
    pub project_dir: PathBuf,
    /// Upper bound for a single engine call other than navigation
    pub call_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            node: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl PlaywrightConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            browser: config.browser,
            headless: config.headless,
            call_timeout: config.timeouts.action().max(Duration::from_secs(1)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// The Node process and the request/reply plumbing around it
struct Bridge {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
    _script_dir: TempDir,
}

impl Bridge {
    async fn call(
        &self,
        op: &str,
        page: Option<u64>,
        args: Value,
        bound: Duration,
    ) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = json!({ "id": id, "op": op, "page": page, "args": args });
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            return Err(E2eError::Driver(format!("playwright bridge write failed: {}", e)));
        }

        let reply = match timeout(bound, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(E2eError::Driver("playwright bridge exited".to_string())),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(E2eError::Driver(format!(
                    "{} timed out after {} ms",
                    op,
                    bound.as_millis()
                )));
            }
        };

        if reply.ok {
            Ok(reply.value)
        } else {
            Err(E2eError::Driver(reply.error.unwrap_or_else(|| format!("{} failed", op))))
        }
    }
}

/// [`Driver`] backed by a real browser through Playwright
pub struct PlaywrightDriver {
    bridge: Arc<Bridge>,
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    /// Check Playwright is installed, then start the bridge process.
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        check_playwright_installed(&config.project_dir).await?;

        let script_dir = tempfile::tempdir()?;
        let script = script_dir.path().join("bridge.js");
        std::fs::write(&script, BRIDGE_JS)?;

        let mut child = TokioCommand::new(&config.node)
            .arg(&script)
            .current_dir(&config.project_dir)
            .env("PW_BROWSER", config.browser.as_str())
            .env("PW_HEADLESS", if config.headless { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::Driver(format!("failed to spawn {}: {}", config.node.display(), e))
            })?;

        let unavailable = |stream: &str| E2eError::Driver(format!("bridge {} unavailable", stream));
        let stdin = child.stdin.take().ok_or_else(|| unavailable("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| unavailable("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| unavailable("stderr"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let replies = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                        Ok(reply) => {
                            if let Some(tx) = replies.lock().remove(&reply.id) {
                                let _ = tx.send(reply);
                            }
                        }
                        Err(e) => warn!("unparseable bridge output: {} ({})", line, e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("bridge stdout read failed: {}", e);
                        break;
                    }
                }
            }
            // Dropping the senders fails every outstanding call.
            replies.lock().clear();
            debug!("playwright bridge stdout closed");
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "playwright", "{}", line);
            }
        });

        info!(
            browser = config.browser.as_str(),
            headless = config.headless,
            "playwright bridge started"
        );
        Ok(Self {
            bridge: Arc::new(Bridge {
                stdin: tokio::sync::Mutex::new(stdin),
                pending,
                next_id: AtomicU64::new(1),
                child: Mutex::new(Some(child)),
                _script_dir: script_dir,
            }),
            config,
        })
    }

    /// Close the browser and stop the bridge: ask politely, then SIGTERM,
    /// then kill.
    pub async fn shutdown(&self) {
        let request = self.bridge.call("shutdown", None, json!({}), Duration::from_secs(5));
        if let Err(e) = request.await {
            debug!("bridge shutdown request failed: {}", e);
        }
        let child = self.bridge.child.lock().take();
        let Some(mut child) = child else {
            return;
        };
        if timeout(Duration::from_secs(5), child.wait()).await.is_ok() {
            info!("playwright bridge stopped");
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && timeout(Duration::from_millis(500), child.wait()).await.is_ok()
                {
                    return;
                }
            }
        }

        warn!("playwright bridge did not exit, killing it");
        let _ = child.kill().await;
    }
}

#[async_trait]
impl Driver for PlaywrightDriver {
    fn name(&self) -> &str {
        "playwright"
    }

    async fn open_page(&self, viewport: Viewport) -> E2eResult<Box<dyn Page>> {
        // First open also launches the browser.
        let id = self
            .bridge
            .call("open", None, json!({ "viewport": viewport }), Duration::from_secs(60))
            .await?
            .as_u64()
            .ok_or_else(|| E2eError::Driver("open returned no page id".to_string()))?;
        debug!(page = id, viewport = %viewport, "page opened");
        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            id,
            call_timeout: self.config.call_timeout,
        }))
    }
}

struct PlaywrightPage {
    bridge: Arc<Bridge>,
    id: u64,
    call_timeout: Duration,
}

impl PlaywrightPage {
    async fn call(&self, op: &str, args: Value) -> E2eResult<Value> {
        // Slack so the engine's own timeout reports first
        let bound = self.call_timeout + Duration::from_secs(1);
        self.bridge.call(op, Some(self.id), args, bound).await
    }

    fn element(&self, locator: &Locator, index: usize) -> Value {
        json!({
            "locator": locator,
            "index": index,
            "timeout_ms": self.call_timeout.as_millis() as u64,
        })
    }
}

fn with(mut args: Value, key: &str, value: Value) -> Value {
    if let Value::Object(map) = &mut args {
        map.insert(key.to_string(), value);
    }
    args
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> E2eResult<()> {
        let args = json!({ "url": url, "timeout_ms": timeout.as_millis() as u64 });
        self.bridge
            .call("goto", Some(self.id), args, timeout + Duration::from_secs(1))
            .await
            .map(|_| ())
            .map_err(|e| E2eError::NavigationFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn count(&self, locator: &Locator) -> E2eResult<usize> {
        let value = self.call("count", json!({ "locator": locator })).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| E2eError::Driver(format!("count returned {}", value)))
    }

    async fn is_visible(&self, locator: &Locator, index: usize) -> E2eResult<bool> {
        let value = self.call("visible", self.element(locator, index)).await?;
        value
            .as_bool()
            .ok_or_else(|| E2eError::Driver(format!("visible returned {}", value)))
    }

    async fn click(&mut self, locator: &Locator, index: usize) -> E2eResult<()> {
        self.call("click", self.element(locator, index)).await.map(|_| ())
    }

    async fn fill(&mut self, locator: &Locator, index: usize, text: &str) -> E2eResult<()> {
        let args = with(self.element(locator, index), "text", json!(text));
        self.call("fill", args).await.map(|_| ())
    }

    async fn set_input_files(
        &mut self,
        locator: &Locator,
        index: usize,
        path: &Path,
    ) -> E2eResult<()> {
        let absolute = std::fs::canonicalize(path)?;
        let args = with(self.element(locator, index), "path", json!(absolute));
        self.call("files", args).await.map(|_| ())
    }

    async fn press(&mut self, target: Option<(&Locator, usize)>, key: &str) -> E2eResult<()> {
        let args = match target {
            Some((locator, index)) => with(self.element(locator, index), "key", json!(key)),
            None => json!({ "key": key }),
        };
        self.call("press", args).await.map(|_| ())
    }

    async fn set_viewport(&mut self, viewport: Viewport) -> E2eResult<()> {
        self.call("viewport", json!({ "viewport": viewport })).await.map(|_| ())
    }

    async fn set_offline(&mut self, offline: bool) -> E2eResult<()> {
        self.call("offline", json!({ "offline": offline })).await.map(|_| ())
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        let value = self.call("screenshot", json!({})).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| E2eError::Driver("screenshot returned no data".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| E2eError::Driver(format!("screenshot is not base64: {}", e)))
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.call("close", json!({})).await.map(|_| ())
    }
}

/// Check if Playwright is installed
pub async fn check_playwright_installed(project_dir: &Path) -> E2eResult<()> {
    let status = TokioCommand::new("npx")
        .args(["playwright", "--version"])
        .current_dir(project_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(E2eError::PlaywrightNotFound),
    }
}
