//! iperf3 traffic generator
//!
//! A server and a client process run inside two guests, driven over their
//! serial consoles. A TCP connection is considered alive while both
//! processes are still running.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::kubevirt::{ConsoleLauncher, ConsoleTarget};

/// Default iperf3 port
pub const IPERF_SERVER_PORT: u16 = 5201;

/// Client gives up connecting after this many milliseconds
const CONNECT_TIMEOUT_MS: u32 = 300;

fn server_command(port: u16) -> String {
    format!("iperf3 --server --port {port} --one-off")
}

fn client_command(server_ip: &str, port: u16) -> String {
    format!("iperf3 --client {server_ip} --time 0 --port {port} --connect-timeout {CONNECT_TIMEOUT_MS}")
}

/// A long-running guest process
struct GuestProcess {
    vm: ConsoleTarget,
    command: String,
    launcher: ConsoleLauncher,
}

impl GuestProcess {
    async fn start(launcher: ConsoleLauncher, vm: ConsoleTarget, command: String) -> Result<Self> {
        let process = Self { vm, command, launcher };
        info!("{}: starting `{}`", process.vm.vm, process.command);
        process
            .launcher
            .run(process.vm.clone(), format!("{} &", process.command))
            .await?;

        if !process.is_running().await {
            process.stop().await;
            anyhow::bail!("{}: `{}` is not running", process.vm.vm, process.command);
        }
        Ok(process)
    }

    async fn is_running(&self) -> bool {
        let check = format!("pgrep -fx '{}'", self.command);
        match self.launcher.run(self.vm.clone(), check).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("{}: process check failed: {}", self.vm.vm, e);
                false
            }
        }
    }

    async fn stop(&self) {
        let kill = format!("pkill -f '{}'", self.command);
        if let Err(e) = self.launcher.run(self.vm.clone(), kill).await {
            warn!("{}: failed to stop `{}`: {}", self.vm.vm, self.command, e);
        }
    }
}

/// iperf3 server role
pub struct Server {
    process: GuestProcess,
    port: u16,
}

impl Server {
    /// Start a one-off iperf3 server in `vm`
    pub async fn start(launcher: ConsoleLauncher, vm: ConsoleTarget, port: u16) -> Result<Self> {
        let process = GuestProcess::start(launcher, vm, server_command(port)).await?;
        Ok(Self { process, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn is_running(&self) -> bool {
        self.process.is_running().await
    }

    /// Kill the server process; failures are logged
    pub async fn stop(&self) {
        self.process.stop().await
    }
}

/// iperf3 client role
pub struct Client {
    process: GuestProcess,
    server_ip: String,
}

impl Client {
    /// Start an endless iperf3 client in `vm` against `server_ip`
    pub async fn start(launcher: ConsoleLauncher, vm: ConsoleTarget, server_ip: &str, server_port: u16) -> Result<Self> {
        let process = GuestProcess::start(launcher, vm, client_command(server_ip, server_port)).await?;
        Ok(Self {
            process,
            server_ip: server_ip.to_string(),
        })
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub async fn is_running(&self) -> bool {
        self.process.is_running().await
    }

    /// Kill the client process; failures are logged
    pub async fn stop(&self) {
        self.process.stop().await
    }
}

/// Whether the server and client are both still running
pub async fn is_tcp_connection(server: &Server, client: &Client) -> bool {
    debug!(
        "Checking iperf3 connection from {} to {}:{}",
        client.process.vm.vm,
        client.server_ip(),
        server.port()
    );
    server.is_running().await && client.is_running().await
}
