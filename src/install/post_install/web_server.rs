//! Web servers shipped as zips (nginx)
//!
//! The only strategy that starts what it installed. After extraction the
//! config is pointed at the real `html` directory, any running instance is
//! stopped, and the server is started in the background and probed over HTTP.
//! When it does not answer, `logs/error.log` is inspected and one of a fixed
//! set of remediations is applied before the next start attempt. Each
//! remediation runs at most once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{ConfigureContext, PostInstallStrategy, locate_product_dir};
use crate::install::async_task::AsyncTask;
use crate::install::progress::ProgressStatus;
use crate::install::runner::RunRequest;

#[cfg(windows)]
const BINARY: &str = "nginx.exe";
#[cfg(not(windows))]
const BINARY: &str = "nginx";

const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
/// Lets a stopped instance release its ports
const STOP_GRACE: Duration = Duration::from_millis(500);

const PLACEHOLDER_PAGE: &str = "<!DOCTYPE html>
<html>
<head><title>Welcome to nginx</title></head>
<body>
<h1>nginx is running</h1>
<p>Installed by SetupFlow. Replace this page with your own content.</p>
</body>
</html>
";

static ROOT_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*root\s+)([^;]+);").expect("valid root directive regex"));

static LISTEN_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\s*listen\s+)((?:\S*:)?)(\d+)([^;]*);").expect("valid listen directive regex")
});

/// Known reasons for a server that started but never answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartupFailure {
    PortInUse,
    PermissionDenied,
    MissingDirectories,
    ConfigSyntax,
}

pub struct WebServerStrategy;

impl PostInstallStrategy for WebServerStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(configure(ctx))
    }
}

async fn configure(ctx: ConfigureContext) -> Result<()> {
    let home = locate_product_dir(&ctx.install_path, "nginx-", BINARY)
        .await
        .ok_or_else(|| anyhow!("Could not find an nginx directory in {}", ctx.install_path.display()))?;
    let exe = home.join(BINARY);
    let conf = home.join("conf").join("nginx.conf");

    for (path, what) in [(&exe, "server executable"), (&conf, "server configuration")] {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            bail!("Missing {what}: {}", path.display());
        }
    }
    ctx.log(format!("{} home: {}", ctx.name, home.display())).await;

    ctx.report(ProgressStatus::Configuring, "Configuring web server...");
    fix_document_root(&ctx, &home, &conf).await?;

    let mut ports = ctx.settings.web_server.ports.clone();
    let mut applied: Vec<StartupFailure> = Vec::new();

    loop {
        stop_running(&ctx, &exe, &home).await;

        let log_offset = error_log_len(&home).await;
        ctx.report(ProgressStatus::Configuring, "Starting web server...");
        ctx.services.spawn_detached(&exe, &prefix_args(&home), &home)?;
        ctx.log(format!("Started {} in the background", exe.display())).await;

        ctx.report(ProgressStatus::Testing, "Verifying web server...");
        if let Some(port) = probe_ready(&ctx, &ports).await? {
            let tail = error_log_since(&home, log_offset).await;
            if diagnose(&tail, false) != Some(StartupFailure::PortInUse) {
                return on_ready(&ctx, port).await;
            }
            ctx.log(format!("Port {port} answered but error.log reports a bind failure"))
                .await;
        }

        let tail = error_log_since(&home, log_offset).await;
        if !tail.trim().is_empty() {
            ctx.log(format!("error.log after start:\n{}", tail.trim_end())).await;
        }
        let logs_missing = !tokio::fs::try_exists(home.join("logs")).await.unwrap_or(false);

        let Some(failure) = diagnose(&tail, logs_missing) else {
            bail!(
                "{} did not respond on ports {:?} and the error log gave no known cause",
                ctx.name,
                ports
            );
        };
        if applied.contains(&failure) {
            bail!("{} still not responding after remediating {failure:?}", ctx.name);
        }
        applied.push(failure);

        ctx.logger
            .warn(format!("{} failed to start ({failure:?}), attempting remediation", ctx.name))
            .await;
        remediate(&ctx, failure, &exe, &home, &conf, &mut ports).await?;
    }
}

async fn fix_document_root(ctx: &ConfigureContext, home: &Path, conf: &Path) -> Result<()> {
    let html = nginx_path(&home.join("html"));
    let text = tokio::fs::read_to_string(conf)
        .await
        .with_context(|| format!("Failed to read {}", conf.display()))?;

    let (rewritten, changed) = rewrite_root_directives(&text, &html);
    if changed > 0 {
        tokio::fs::write(conf, rewritten)
            .await
            .with_context(|| format!("Failed to write {}", conf.display()))?;
        ctx.log(format!("Updated {changed} root directive(s) to {html}")).await;
    }
    Ok(())
}

async fn stop_running(ctx: &ConfigureContext, exe: &Path, home: &Path) {
    #[cfg(windows)]
    let command = {
        let _ = (exe, home);
        format!("taskkill /F /IM {BINARY}")
    };
    #[cfg(not(windows))]
    let command = format!(
        "\"{}\" -p \"{}\" -s stop",
        exe.display(),
        prefix(home)
    );

    let request = RunRequest::new(&ctx.name, command, ctx.logger.clone())
        .timeout(Some(CONTROL_TIMEOUT))
        .cancel(ctx.cancel.clone())
        .log_prefix("STOP ");
    match ctx.services.run_silent_install(request).await {
        Ok(output) if output.success() => {
            ctx.log("Stopped a running instance").await;
            tokio::time::sleep(STOP_GRACE).await;
        }
        Ok(_) => debug!("no running {BINARY} to stop"),
        Err(e) => debug!("stop attempt failed: {e}"),
    }
}

/// First port answered by nginx itself, polling until attempts run out.
/// Responses from any other server on a probed port do not count.
async fn probe_ready(ctx: &ConfigureContext, ports: &[u16]) -> Result<Option<u16>> {
    let settings = &ctx.settings.web_server;
    let client = reqwest::Client::builder()
        .timeout(HTTP_PROBE_TIMEOUT)
        .no_proxy()
        .build()
        .context("Failed to build HTTP client")?;
    let interval = Duration::from_millis(settings.probe_interval_ms);

    for attempt in 1..=settings.probe_attempts.max(1) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.cancel.cancelled() => bail!("Readiness probe cancelled"),
        }

        for &port in ports {
            let url = format!("http://127.0.0.1:{port}/");
            match client.get(&url).send().await {
                Ok(response) => {
                    let server = response
                        .headers()
                        .get(reqwest::header::SERVER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if served_by_nginx(&server) {
                        ctx.log(format!("HTTP probe {url} answered {} ({server})", response.status()))
                            .await;
                        return Ok(Some(port));
                    }
                    ctx.log(format!(
                        "HTTP probe {url} answered {} from another server ({})",
                        response.status(),
                        if server.is_empty() { "no Server header" } else { server.as_str() }
                    ))
                    .await;
                }
                Err(e) => debug!("probe {url} failed: {e}"),
            }
        }

        ctx.log(format!(
            "Readiness attempt {attempt}/{}: no response on ports {ports:?}",
            settings.probe_attempts
        ))
        .await;
    }

    Ok(None)
}

async fn on_ready(ctx: &ConfigureContext, port: u16) -> Result<()> {
    let url = service_url(port);
    ctx.log(format!("Web server is running at {url}")).await;
    ctx.report(ProgressStatus::Testing, format!("Web server responding at {url}"));

    if ctx.settings.web_server.open_browser {
        match ctx.services.open_url(&url).await {
            Ok(()) => ctx.log(format!("Opened {url} in the browser")).await,
            Err(e) => ctx.logger.warn(format!("Could not open a browser: {e}")).await,
        }
    }
    Ok(())
}

async fn remediate(
    ctx: &ConfigureContext,
    failure: StartupFailure,
    exe: &Path,
    home: &Path,
    conf: &Path,
    ports: &mut Vec<u16>,
) -> Result<()> {
    match failure {
        StartupFailure::PortInUse => {
            let fallback = ctx.settings.web_server.fallback_port;
            let text = tokio::fs::read_to_string(conf).await?;
            let (rewritten, changed) = rewrite_listen_port(&text, fallback);
            if changed == 0 {
                bail!("Port in use but no listen directive could be moved to {fallback}");
            }
            tokio::fs::write(conf, rewritten).await?;
            ctx.log(format!("Moved {changed} listen directive(s) to port {fallback}")).await;
            ports.retain(|p| *p != fallback);
            ports.insert(0, fallback);
        }
        StartupFailure::MissingDirectories => {
            for dir in ["logs", "temp", "html"] {
                tokio::fs::create_dir_all(home.join(dir)).await?;
            }
            let index = home.join("html").join("index.html");
            if !tokio::fs::try_exists(&index).await.unwrap_or(false) {
                tokio::fs::write(&index, PLACEHOLDER_PAGE).await?;
            }
            ctx.log("Created logs, temp and html directories").await;
        }
        StartupFailure::PermissionDenied => {
            ctx.services
                .grant_full_access(home)
                .await
                .with_context(|| format!("Failed to broaden permissions on {}", home.display()))?;
            ctx.log(format!("Granted full access on {}", home.display())).await;
        }
        StartupFailure::ConfigSyntax => {
            let command = format!("\"{}\" -t -p \"{}\"", exe.display(), prefix(home));
            let request = RunRequest::new(&ctx.name, command, ctx.logger.clone())
                .timeout(Some(CONTROL_TIMEOUT))
                .cancel(ctx.cancel.clone())
                .working_dir(home)
                .log_prefix("CONFIG TEST ");
            let output = ctx.services.run_silent_install(request).await?;
            bail!(
                "Configuration test failed for {} (exit code {:?}); fix the syntax error and start the server manually",
                conf.display(),
                output.exit_code
            );
        }
    }
    Ok(())
}

fn served_by_nginx(server_header: &str) -> bool {
    server_header.trim().to_ascii_lowercase().starts_with("nginx")
}

fn diagnose(error_log: &str, logs_dir_missing: bool) -> Option<StartupFailure> {
    let log = error_log.to_lowercase();

    if log.contains("bind()")
        && (log.contains("10048") || log.contains("10013") || log.contains("address already in use"))
    {
        return Some(StartupFailure::PortInUse);
    }
    if log.contains("access is denied") || log.contains("permission denied") {
        return Some(StartupFailure::PermissionDenied);
    }
    if logs_dir_missing
        || log.contains("the system cannot find the path specified")
        || log.contains("no such file or directory")
    {
        return Some(StartupFailure::MissingDirectories);
    }
    if log.contains("[emerg]") && log.contains(".conf:") {
        return Some(StartupFailure::ConfigSyntax);
    }
    None
}

/// Points every `root` directive at `html_dir`, returning how many changed
fn rewrite_root_directives(conf: &str, html_dir: &str) -> (String, usize) {
    let mut changed = 0;
    let rewritten = ROOT_DIRECTIVE.replace_all(conf, |caps: &Captures| {
        let current = caps[2].trim().trim_matches('"');
        if current == html_dir {
            caps[0].to_string()
        } else {
            changed += 1;
            format!("{}\"{html_dir}\";", &caps[1])
        }
    });
    (rewritten.into_owned(), changed)
}

/// Moves every `listen` directive to `port`, keeping address and flags
fn rewrite_listen_port(conf: &str, port: u16) -> (String, usize) {
    let mut changed = 0;
    let rewritten = LISTEN_DIRECTIVE.replace_all(conf, |caps: &Captures| {
        if caps[3].parse::<u16>().ok() == Some(port) {
            caps[0].to_string()
        } else {
            changed += 1;
            format!("{}{}{port}{};", &caps[1], &caps[2], &caps[4])
        }
    });
    (rewritten.into_owned(), changed)
}

/// nginx wants forward slashes on every platform
fn nginx_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

fn prefix(home: &Path) -> String {
    let mut prefix = nginx_path(home);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

fn prefix_args(home: &Path) -> Vec<String> {
    vec!["-p".to_string(), prefix(home)]
}

fn service_url(port: u16) -> String {
    if port == 80 {
        "http://localhost/".to_string()
    } else {
        format!("http://localhost:{port}/")
    }
}

fn error_log_path(home: &Path) -> PathBuf {
    home.join("logs").join("error.log")
}

async fn error_log_len(home: &Path) -> u64 {
    tokio::fs::metadata(error_log_path(home))
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Only what the last start attempt wrote
async fn error_log_since(home: &Path, offset: u64) -> String {
    let bytes = tokio::fs::read(error_log_path(home)).await.unwrap_or_default();
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_CONF: &str = "\
http {
    server {
        listen       80;
        server_name  localhost;

        location / {
            root   html;
            index  index.html index.htm;
        }

        error_page   500 502 503 504  /50x.html;
        location = /50x.html {
            root   html;
        }
    }
}
";

    #[test]
    fn root_directives_point_at_the_extracted_html() {
        let (conf, changed) = rewrite_root_directives(DEFAULT_CONF, "C:/Program Files/nginx-1.26.1/html");
        assert_eq!(changed, 2);
        assert!(conf.contains("root   \"C:/Program Files/nginx-1.26.1/html\";"));
        assert!(!conf.contains("root   html;"));

        let (again, changed) = rewrite_root_directives(&conf, "C:/Program Files/nginx-1.26.1/html");
        assert_eq!(changed, 0);
        assert_eq!(again, conf);
    }

    #[test]
    fn listen_directives_move_to_the_fallback_port() {
        let (conf, changed) = rewrite_listen_port(DEFAULT_CONF, 8080);
        assert_eq!(changed, 1);
        assert!(conf.contains("listen       8080;"));

        let (conf, changed) = rewrite_listen_port("  listen 127.0.0.1:80 default_server;\n", 8081);
        assert_eq!(changed, 1);
        assert_eq!(conf, "  listen 127.0.0.1:8081 default_server;\n");
    }

    #[test]
    fn startup_failures_are_recognised() {
        let port = "2024/05/01 10:00:00 [emerg] 1234#5678: bind() to 0.0.0.0:80 failed (10013: An attempt was made to access a socket in a way forbidden by its access permissions)";
        assert_eq!(diagnose(port, false), Some(StartupFailure::PortInUse));

        let denied = r#"[alert] 1#2: CreateFile() "C:\nginx/logs/nginx.pid" failed (5: Access is denied)"#;
        assert_eq!(diagnose(denied, false), Some(StartupFailure::PermissionDenied));

        let missing = r#"[emerg] 1#2: CreateDirectory() "C:\nginx/temp/client_body_temp" failed (3: The system cannot find the path specified)"#;
        assert_eq!(diagnose(missing, false), Some(StartupFailure::MissingDirectories));

        let syntax = r#"[emerg] 1#2: unknown directive "lisen" in C:\nginx/conf/nginx.conf:36"#;
        assert_eq!(diagnose(syntax, false), Some(StartupFailure::ConfigSyntax));

        assert_eq!(diagnose("", true), Some(StartupFailure::MissingDirectories));
        assert_eq!(diagnose("[notice] signal process started", false), None);
    }

    #[test]
    fn paths_use_forward_slashes() {
        assert_eq!(nginx_path(Path::new(r"C:\tools\nginx")), "C:/tools/nginx");
        assert_eq!(prefix(Path::new("/opt/nginx")), "/opt/nginx/");
        assert_eq!(service_url(80), "http://localhost/");
        assert_eq!(service_url(8080), "http://localhost:8080/");
    }

    #[test]
    fn only_nginx_counts_as_ready() {
        assert!(served_by_nginx("nginx/1.26.1"));
        assert!(served_by_nginx("nginx"));
        assert!(!served_by_nginx("Microsoft-IIS/10.0"));
        assert!(!served_by_nginx(""));
    }

    mod configure {
        use std::sync::Arc;

        use super::super::*;
        use crate::install::post_install::test_support::{
            FakeServices, append_error_log, batch_log, closed_port, context, http_responder, settings,
        };
        use crate::install::settings::{InstallSettings, WebServerSettings};

        const BIND_FAILURE: &str =
            "2024/05/01 10:00:00 [emerg] 1#2: bind() to 0.0.0.0:80 failed (98: Address already in use)";
        const STARTED: &str = "2024/05/01 10:00:00 [notice] 1#2: start worker processes";

        /// `<root>/install/nginx-1.26.1` with the stock layout
        fn nginx_home(root: &Path) -> PathBuf {
            let home = root.join("install").join("nginx-1.26.1");
            for dir in ["conf", "logs", "html"] {
                std::fs::create_dir_all(home.join(dir)).unwrap();
            }
            std::fs::write(home.join(BINARY), "").unwrap();
            std::fs::write(home.join("conf").join("nginx.conf"), super::DEFAULT_CONF).unwrap();
            home
        }

        fn web_settings(root: &Path, ports: Vec<u16>, fallback_port: u16) -> InstallSettings {
            let mut settings = settings(root);
            settings.web_server = WebServerSettings {
                ports,
                fallback_port,
                probe_attempts: 1,
                probe_interval_ms: 10,
                open_browser: true,
            };
            settings
        }

        fn conf_text(home: &Path) -> String {
            std::fs::read_to_string(home.join("conf").join("nginx.conf")).unwrap()
        }

        #[tokio::test]
        async fn each_remediation_runs_once_then_gives_up() {
            let dir = tempfile::tempdir().unwrap();
            let home = nginx_home(dir.path());
            let fallback = closed_port();
            let services = Arc::new(
                FakeServices::new().on_spawn(|home| append_error_log(home, BIND_FAILURE)),
            );
            let ctx = context(
                dir.path(),
                services.clone(),
                web_settings(dir.path(), vec![closed_port()], fallback),
            );

            let err = WebServerStrategy.configure(ctx.clone()).await.unwrap_err();
            assert!(err.to_string().contains("still not responding after remediating PortInUse"));
            assert_eq!(services.spawns(), 2);
            assert!(conf_text(&home).contains(&format!("listen       {fallback};")));
            assert_eq!(batch_log(&ctx).matches("attempting remediation").count(), 1);
            assert!(services.opened().is_empty());
        }

        #[tokio::test]
        async fn config_syntax_errors_are_tested_not_repaired() {
            let dir = tempfile::tempdir().unwrap();
            let home = nginx_home(dir.path());
            let syntax = format!(
                "2024/05/01 10:00:00 [emerg] 1#2: unknown directive \"lisen\" in {}/conf/nginx.conf:36",
                home.display()
            );
            let services = Arc::new(
                FakeServices::new().on_spawn(move |home| append_error_log(home, &syntax)),
            );
            let ctx = context(
                dir.path(),
                services.clone(),
                web_settings(dir.path(), vec![closed_port()], closed_port()),
            );

            let err = WebServerStrategy.configure(ctx).await.unwrap_err();
            assert!(err.to_string().contains("Configuration test failed"));
            assert_eq!(services.spawns(), 1);
            assert_eq!(
                services.commands().iter().filter(|c| c.contains(" -t -p ")).count(),
                1
            );
            assert!(conf_text(&home).contains("listen       80;"));
        }

        #[tokio::test]
        async fn browser_failure_does_not_fail_configuration() {
            let dir = tempfile::tempdir().unwrap();
            let home = nginx_home(dir.path());
            let port = http_responder("nginx/1.26.1");
            let services = Arc::new(
                FakeServices::new()
                    .browser_fails()
                    .on_spawn(|home| append_error_log(home, STARTED)),
            );
            let ctx = context(
                dir.path(),
                services.clone(),
                web_settings(dir.path(), vec![port], closed_port()),
            );

            WebServerStrategy.configure(ctx.clone()).await.unwrap();
            assert_eq!(services.opened(), vec![format!("http://localhost:{port}/")]);
            assert!(batch_log(&ctx).contains("Could not open a browser"));
            assert!(conf_text(&home).contains(&format!("root   \"{}\";", nginx_path(&home.join("html")))));
        }

        #[tokio::test]
        async fn foreign_server_on_the_port_does_not_mask_a_bind_failure() {
            let dir = tempfile::tempdir().unwrap();
            let home = nginx_home(dir.path());
            let foreign = http_responder("Microsoft-IIS/10.0");
            let fallback = http_responder("nginx/1.26.1");
            let moved = format!("listen       {fallback};");
            let services = Arc::new(FakeServices::new().on_spawn(move |home| {
                let conf = std::fs::read_to_string(home.join("conf").join("nginx.conf")).unwrap();
                if conf.contains(&moved) {
                    append_error_log(home, STARTED);
                } else {
                    append_error_log(home, BIND_FAILURE);
                }
            }));
            let ctx = context(
                dir.path(),
                services.clone(),
                web_settings(dir.path(), vec![foreign], fallback),
            );

            WebServerStrategy.configure(ctx.clone()).await.unwrap();
            assert_eq!(services.spawns(), 2);
            assert!(conf_text(&home).contains(&format!("listen       {fallback};")));
            assert!(batch_log(&ctx).contains("from another server (Microsoft-IIS/10.0)"));
            assert_eq!(services.opened(), vec![format!("http://localhost:{fallback}/")]);
        }
    }

    #[tokio::test]
    async fn error_log_tail_skips_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        std::fs::write(error_log_path(dir.path()), "old line\n").unwrap();
        let offset = error_log_len(dir.path()).await;

        let mut log = std::fs::read_to_string(error_log_path(dir.path())).unwrap();
        log.push_str("new line\n");
        std::fs::write(error_log_path(dir.path()), log).unwrap();

        assert_eq!(error_log_since(dir.path(), offset).await, "new line\n");
    }
}
