//! Readiness and liveness probing.

use std::net::IpAddr;
use std::time::Duration;

use devflow_workflow::{HealthCheck, Probe};
use tokio::net::TcpStream;
use tracing::debug;

use crate::args;
use crate::cli::Docker;

/// Runs the probes of one container.
pub(crate) struct Prober<'a> {
  pub(crate) docker: &'a Docker,
  pub(crate) http: &'a reqwest::Client,
  pub(crate) container: &'a str,
  pub(crate) pod: &'a str,
}

impl Prober<'_> {
  /// Poll until the probe passes. Never gives up; the caller races this
  /// against the container exiting.
  pub(crate) async fn until_ready(&self, check: &HealthCheck) {
    tokio::time::sleep(check.grace).await;
    loop {
      match self.probe(check).await {
        Ok(()) => return,
        Err(message) => debug!(pod = %self.pod, message = %message, "readiness_probe_failed"),
      }
      tokio::time::sleep(check.interval).await;
    }
  }

  /// Poll until the probe fails `retries` times in a row. Returns the last
  /// failure.
  pub(crate) async fn until_unhealthy(&self, check: &HealthCheck) -> String {
    tokio::time::sleep(check.grace).await;
    let mut failures = 0;
    loop {
      match self.probe(check).await {
        Ok(()) => failures = 0,
        Err(message) => {
          failures += 1;
          debug!(pod = %self.pod, failures, message = %message, "liveness_probe_failed");
          if failures >= check.retries.max(1) {
            return message;
          }
        }
      }
      tokio::time::sleep(check.interval).await;
    }
  }

  async fn probe(&self, check: &HealthCheck) -> Result<(), String> {
    match tokio::time::timeout(check.timeout, self.attempt(&check.probe)).await {
      Ok(result) => result,
      Err(_) => Err(format!("timed out after {}s", check.timeout.as_secs())),
    }
  }

  async fn attempt(&self, probe: &Probe) -> Result<(), String> {
    match probe {
      Probe::Tcp { port } => {
        let address = self.address().await?;
        TcpStream::connect((address, *port))
          .await
          .map(|_| ())
          .map_err(|e| e.to_string())
      }
      Probe::Http { port, path } => self.get("http", *port, path).await,
      Probe::Https { port, path } => self.get("https", *port, path).await,
      Probe::Script { script } => {
        let output = self
          .docker
          .output(&args::exec_args(self.container, script))
          .await
          .map_err(|e| e.to_string())?;
        if output.status.success() {
          Ok(())
        } else {
          Err(format!("probe script exited with {}", output.status))
        }
      }
    }
  }

  async fn get(&self, scheme: &str, port: u16, path: &str) -> Result<(), String> {
    let address = self.address().await?;
    let url = probe_url(scheme, address, port, path);
    let response = self.http.get(&url).send().await.map_err(|e| e.to_string())?;
    if response.status().is_success() {
      Ok(())
    } else {
      Err(format!("{url} returned {}", response.status()))
    }
  }

  /// The container's address on its first network.
  async fn address(&self) -> Result<IpAddr, String> {
    let output = self
      .docker
      .run(&args::address_args(self.container), |message| {
        devflow_coordinator::CoordinatorError::Run {
          pod: self.pod.to_string(),
          message,
        }
      })
      .await
      .map_err(|e| e.to_string())?;
    parse_address(&output).ok_or_else(|| format!("container {} has no address", self.container))
  }
}

fn parse_address(output: &str) -> Option<IpAddr> {
  output.split_whitespace().find_map(|word| word.parse().ok())
}

fn probe_url(scheme: &str, address: IpAddr, port: u16, path: &str) -> String {
  let host = match address {
    IpAddr::V4(v4) => v4.to_string(),
    IpAddr::V6(v6) => format!("[{v6}]"),
  };
  let path = path.strip_prefix('/').unwrap_or(path);
  format!("{scheme}://{host}:{port}/{path}")
}

/// HTTP client shared by every probe. Probed services commonly use
/// self-signed certificates.
pub(crate) fn http_client() -> reqwest::Client {
  reqwest::Client::builder()
    .danger_accept_invalid_certs(true)
    .connect_timeout(Duration::from_secs(5))
    .build()
    .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_address() {
    assert_eq!(
      parse_address("172.17.0.3 \n"),
      Some("172.17.0.3".parse().unwrap())
    );
    assert_eq!(parse_address(" 10.0.0.2 172.18.0.4"), Some("10.0.0.2".parse().unwrap()));
    assert_eq!(parse_address("\n"), None);
  }

  #[test]
  fn test_probe_url() {
    let v4: IpAddr = "172.17.0.3".parse().unwrap();
    assert_eq!(probe_url("http", v4, 8080, "/health"), "http://172.17.0.3:8080/health");
    assert_eq!(probe_url("https", v4, 443, "ready"), "https://172.17.0.3:443/ready");

    let v6: IpAddr = "fd00::2".parse().unwrap();
    assert_eq!(probe_url("http", v6, 80, "/"), "http://[fd00::2]:80/");
  }
}
