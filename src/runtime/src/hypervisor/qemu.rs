//! QEMU/KVM driver.
//!
//! QEMU runs daemonized with a pid file in the pod's run directory, so a
//! pod started by one process can be stopped by another.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use vpod_core::error::{PodError, Result};
use vpod_core::{AgentConfig, HypervisorConfig, PodConfig};

use super::Hypervisor;
use crate::network::interface_mac;

/// QMP control socket.
pub const CONTROL_SOCKET: &str = "ctrl.sock";

/// QEMU pid file.
pub const PID_FILE: &str = "qemu.pid";

/// Kernel command line always passed to the guest.
const KERNEL_PARAMS: &[&str] = &["root=/dev/vda", "rw", "console=hvc0", "quiet"];

/// How often a running VM is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// QEMU hypervisor driver.
#[derive(Debug)]
pub struct Qemu {
    run_path: PathBuf,
    state: Mutex<QemuState>,
    /// Held while a launcher process runs, even if `start_pod` is dropped.
    launch: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Default)]
struct QemuState {
    config: Option<HypervisorConfig>,
    pod: Option<PodConfig>,
}

impl Qemu {
    pub fn new(run_path: &Path) -> Self {
        Self {
            run_path: run_path.to_path_buf(),
            state: Mutex::new(QemuState::default()),
            launch: Arc::default(),
        }
    }

    fn pid_file(&self) -> PathBuf {
        self.run_path.join(PID_FILE)
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, QemuState>> {
        self.state
            .lock()
            .map_err(|_| PodError::HypervisorError("qemu state lock poisoned".to_string()))
    }

    /// Program and arguments launching the VM.
    fn command(&self) -> Result<(OsString, Vec<OsString>)> {
        let state = self.state()?;
        let config = state.config.as_ref().ok_or_else(|| {
            PodError::HypervisorError("qemu used before init".to_string())
        })?;
        let pod = state.pod.as_ref().ok_or_else(|| {
            PodError::HypervisorError("qemu started before create_pod".to_string())
        })?;

        let args = qemu_args(config, pod, &self.run_path);
        let qemu = config.hypervisor_path.clone().into_os_string();

        // TAP devices live in the pod's namespace.
        Ok(match &pod.network_config.netns_path {
            Some(netns) => {
                let mut wrapped = vec![OsString::from(format!("--net={}", netns.display())), qemu];
                wrapped.extend(args);
                (OsString::from("nsenter"), wrapped)
            }
            None => (qemu, args),
        })
    }
}

#[async_trait]
impl Hypervisor for Qemu {
    async fn init(&self, config: &HypervisorConfig) -> Result<()> {
        let mut config = config.clone();
        config.validate()?;
        self.state()?.config = Some(config);
        Ok(())
    }

    async fn create_pod(&self, config: &PodConfig) -> Result<()> {
        self.state()?.pod = Some(config.clone());
        Ok(())
    }

    async fn start_pod(
        &self,
        started: oneshot::Sender<()>,
        stopped: oneshot::Sender<()>,
    ) -> Result<()> {
        let (program, args) = self.command()?;
        let pid_file = self.pid_file();
        let _ = tokio::fs::remove_file(&pid_file).await;

        tracing::debug!(
            program = %Path::new(&program).display(),
            args = ?args,
            "Launching QEMU"
        );

        // With -daemonize the foreground process exits once the VM is set up.
        // The launcher runs in its own task so a cancelled start cannot
        // orphan it; stop_pod waits on the launch lock.
        let guard = Arc::clone(&self.launch).lock_owned().await;
        let launcher = tokio::spawn(async move {
            let _guard = guard;
            tokio::process::Command::new(&program)
                .args(&args)
                .output()
                .await
                .map_err(|e| {
                    PodError::HypervisorError(format!(
                        "failed to launch {}: {}",
                        Path::new(&program).display(),
                        e
                    ))
                })
        });
        let output = launcher
            .await
            .map_err(|e| PodError::HypervisorError(format!("qemu launcher failed: {}", e)))??;
        if !output.status.success() {
            return Err(PodError::HypervisorError(format!(
                "qemu exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let pid = read_pid(&pid_file).await?;
        tracing::info!(pid, run_path = %self.run_path.display(), "VM started");
        let _ = started.send(());

        while process_alive(pid) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::info!(pid, "VM stopped");
        let _ = stopped.send(());
        Ok(())
    }

    async fn stop_pod(&self) -> Result<()> {
        // A launch still in flight writes the pid file when it finishes.
        let _launch = self.launch.lock().await;

        let pid_file = self.pid_file();
        if !pid_file.exists() {
            tracing::debug!(run_path = %self.run_path.display(), "No VM running");
            return Ok(());
        }
        let pid = read_pid(&pid_file).await?;

        if process_alive(pid) {
            tracing::debug!(pid, "Sending SIGTERM to VM process");
            signal(pid, libc::SIGTERM)?;

            let start = Instant::now();
            while process_alive(pid) {
                if start.elapsed() > SHUTDOWN_TIMEOUT {
                    tracing::warn!(pid, "VM process did not exit gracefully, sending SIGKILL");
                    signal(pid, libc::SIGKILL)?;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        let _ = tokio::fs::remove_file(&pid_file).await;
        tracing::info!(pid, "VM stop requested");
        Ok(())
    }
}

/// QEMU command line for `pod`.
fn qemu_args(config: &HypervisorConfig, pod: &PodConfig, run_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |parts: &[&str]| args.extend(parts.iter().map(OsString::from));

    let mut cmdline: Vec<&str> = KERNEL_PARAMS.to_vec();
    cmdline.extend(config.kernel_params.iter().map(String::as_str));

    push(&["-name", &format!("pod-{}", pod.id)]);
    push(&["-machine", "q35,accel=kvm:tcg", "-cpu", "max"]);
    push(&["-smp", &pod.vm_config.vcpus.to_string()]);
    push(&["-m", &format!("{}M", pod.vm_config.memory)]);
    push(&["-kernel", &config.kernel_path.to_string_lossy()]);
    push(&["-append", &cmdline.join(" ")]);
    push(&[
        "-drive",
        &format!("file={},if=virtio,format=raw", config.image_path.display()),
    ]);

    let mut shares: Vec<(&str, &str)> = Vec::new();
    if !pod.rootfs.is_empty() {
        shares.push(("rootfs", pod.rootfs.as_str()));
    }
    for volume in &pod.volumes {
        shares.push((volume.mount_tag.as_str(), volume.host_path.as_str()));
    }
    for (i, (tag, path)) in shares.iter().enumerate() {
        push(&[
            "-fsdev",
            &format!("local,id=fsdev{},path={},security_model=none", i, path),
        ]);
        push(&[
            "-device",
            &format!("virtio-9p-pci,fsdev=fsdev{},mount_tag={}", i, tag),
        ]);
    }

    for i in 0..pod.network_config.num_interfaces.max(0) {
        push(&[
            "-netdev",
            &format!("tap,id=net{i},ifname=tap{i},script=no,downscript=no"),
        ]);
        push(&[
            "-device",
            &format!(
                "virtio-net-pci,netdev=net{},mac={}",
                i,
                interface_mac(i as u16)
            ),
        ]);
    }

    if let Some(AgentConfig::Socket(agent)) = &pod.agent_config {
        push(&["-device", "virtio-serial-pci,id=serial0"]);
        for socket in &agent.sockets.0 {
            push(&[
                "-chardev",
                &format!(
                    "socket,id={},path={},server=on,wait=off",
                    socket.id, socket.host_path
                ),
            ]);
            push(&[
                "-device",
                &format!(
                    "virtserialport,bus=serial0.0,id={},chardev={},name={}",
                    socket.device_id, socket.id, socket.name
                ),
            ]);
        }
    }

    push(&[
        "-qmp",
        &format!(
            "unix:{},server=on,wait=off",
            run_path.join(CONTROL_SOCKET).display()
        ),
    ]);
    push(&["-display", "none", "-daemonize"]);
    push(&["-pidfile", &run_path.join(PID_FILE).to_string_lossy()]);

    args
}

async fn read_pid(path: &Path) -> Result<i32> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PodError::HypervisorError(format!("failed to read {}: {}", path.display(), e))
    })?;
    content.trim().parse().map_err(|_| {
        PodError::HypervisorError(format!(
            "invalid pid '{}' in {}",
            content.trim(),
            path.display()
        ))
    })
}

pub(crate) fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence and permission.
    let ret = unsafe { libc::kill(pid, 0) };
    let exists = ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !zombie(pid)
}

/// An exited process nobody has reaped yet.
fn zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

fn signal(pid: i32, sig: libc::c_int) -> Result<()> {
    // SAFETY: kill has no memory-safety preconditions.
    let ret = unsafe { libc::kill(pid, sig) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(PodError::HypervisorError(format!(
                "failed to signal VM process {}: {}",
                pid, err
            )));
        }
    }
    Ok(())
}
