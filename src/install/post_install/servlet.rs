//! Servlet containers shipped as zips (Tomcat)
//!
//! Verifies the layout and logs how to operate the server. Never starts it.

use std::path::Path;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{ConfigureContext, PostInstallStrategy, locate_product_dir};
use crate::install::async_task::AsyncTask;

const DEFAULT_HTTP_PORT: u16 = 8080;

static HTTP_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<Connector\s[^>]*?port="(\d+)"[^>]*?protocol="HTTP/1\.1""#)
        .expect("valid connector regex")
});

pub struct ServletContainerStrategy;

impl PostInstallStrategy for ServletContainerStrategy {
    fn configure(&self, ctx: ConfigureContext) -> AsyncTask<Result<()>> {
        AsyncTask::from_future(configure(ctx))
    }
}

async fn configure(ctx: ConfigureContext) -> Result<()> {
    let home = locate_product_dir(&ctx.install_path, "apache-tomcat-", "conf")
        .await
        .ok_or_else(|| anyhow!("Could not find a Tomcat directory in {}", ctx.install_path.display()))?;
    ctx.log(format!("{} home: {}", ctx.name, home.display())).await;

    let startup = home.join("bin").join("startup.bat");
    let shutdown = home.join("bin").join("shutdown.bat");
    let server_xml = home.join("conf").join("server.xml");

    require(&startup, "startup script").await?;
    require(&server_xml, "server configuration").await?;

    let port = tokio::fs::read_to_string(&server_xml)
        .await
        .ok()
        .and_then(|xml| http_port(&xml))
        .unwrap_or(DEFAULT_HTTP_PORT);

    ctx.log(format!("Start:   {}", startup.display())).await;
    ctx.log(format!("Stop:    {}", shutdown.display())).await;
    ctx.log(format!("HTTP port: {port}")).await;
    ctx.log(format!("Home page: http://localhost:{port}/")).await;
    ctx.log(format!("Manager:   http://localhost:{port}/manager/html")).await;
    ctx.log(format!(
        "Manager access needs a user with the manager-gui role in {}",
        home.join("conf").join("tomcat-users.xml").display()
    ))
    .await;
    ctx.log("JAVA_HOME or JRE_HOME must point to a Java runtime before starting")
        .await;

    Ok(())
}

async fn require(path: &Path, what: &str) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(anyhow!("Missing {what}: {}", path.display()))
    }
}

/// Port of the first HTTP/1.1 connector in `server.xml`
fn http_port(server_xml: &str) -> Option<u16> {
    HTTP_CONNECTOR
        .captures(server_xml)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_connector_port() {
        let xml = r#"
            <Server port="8005" shutdown="SHUTDOWN">
              <Service name="Catalina">
                <Connector port="8181" protocol="HTTP/1.1"
                           connectionTimeout="20000"
                           redirectPort="8443" />
              </Service>
            </Server>"#;
        assert_eq!(http_port(xml), Some(8181));
    }

    #[test]
    fn shutdown_port_is_not_mistaken_for_http() {
        assert_eq!(http_port(r#"<Server port="8005" shutdown="SHUTDOWN"/>"#), None);
    }
}
