//! H3C managed switch over its telnet command shell.
//!
//! The session is a [`SerialDut`] on a telnet [`TcpPort`], so the same expect
//! machinery that drives devices under test drives the switch CLI.

use super::{DeviceCommandError, SwitchControl, SwitchTarget};
use crate::config::SwitchConfig;
use crate::dut::{Dut, DutError, LogTarget, LoggedPort, Pattern, SerialDut, DEFAULT_READ_INTERVAL};
use crate::port::{SerialPortAdapter, TcpPort};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const KNOWN_INTERFACE_PREFIXES: [&str; 4] = ["BAG", "XGE", "HGE", "GE"];
const SAVE_TIMEOUT: Duration = Duration::from_secs(60);

/// A row of `display interface brief`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    /// Short name, e.g. `XGE1/0/1`
    pub name: String,
    /// `UP`, `DOWN` or `ADM`
    pub status: String,
    pub speed: String,
    pub duplex: String,
    /// `access`, `trunk`, `hybrid` or empty
    pub link_type: String,
    /// Port VLAN id, 0 when not shown
    pub pvid: u16,
    pub description: String,
}

impl InterfaceInfo {
    /// Parse `Interface Link Speed Duplex Type PVID Description`.
    pub fn parse_line(line: &str) -> Option<Self> {
        if !KNOWN_INTERFACE_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return None;
        }
        let fields = split_fields(line, 7);
        if fields.len() < 6 {
            return None;
        }
        if !matches!(fields[1], "UP" | "DOWN" | "ADM") {
            return None;
        }
        let link_type = match fields[4] {
            "A" => "access",
            "T" => "trunk",
            "H" => "hybrid",
            _ => "",
        };
        Some(Self {
            name: fields[0].to_string(),
            status: fields[1].to_string(),
            speed: fields[2].to_string(),
            duplex: fields[3].to_string(),
            link_type: link_type.to_string(),
            pvid: fields[5].parse().unwrap_or(0),
            description: fields.get(6).copied().unwrap_or("").to_string(),
        })
    }

    pub fn is_up(&self) -> bool {
        self.status == "UP"
    }
}

/// A row of `display interface Vlan-interface brief`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VlanInfo {
    pub id: u16,
    /// e.g. `Vlan111`
    pub interface_name: String,
    pub status: String,
    pub ip: String,
    pub description: String,
}

impl VlanInfo {
    /// Parse `Interface Link Protocol Primary-IP Description`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let id = line.strip_prefix("Vlan")?;
        let fields = split_fields(line, 5);
        if fields.len() < 4 || !matches!(fields[1], "UP" | "DOWN" | "ADM") {
            return None;
        }
        let id = id.split_whitespace().next()?.parse().ok()?;
        Some(Self {
            id,
            interface_name: fields[0].to_string(),
            status: fields[1].to_string(),
            ip: fields[3].to_string(),
            description: fields.get(4).copied().unwrap_or("").to_string(),
        })
    }
}

/// Whitespace split into at most `max_fields`; the last field keeps its
/// inner spaces.
fn split_fields(line: &str, max_fields: usize) -> Vec<&str> {
    let mut fields = Vec::with_capacity(max_fields);
    let mut rest = line.trim();
    while !rest.is_empty() {
        if fields.len() + 1 == max_fields {
            fields.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                fields.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                fields.push(rest);
                break;
            }
        }
    }
    fields
}

/// Drop the echoed command line from command output.
fn strip_echo(output: &str, command: &str) -> String {
    let echo = command
        .char_indices()
        .nth(20)
        .map_or(command, |(i, _)| &command[..i]);
    let mut lines = output.lines().skip_while(|l| l.trim().is_empty()).peekable();
    if lines.peek().is_some_and(|l| l.contains(echo)) {
        lines.next();
    }
    lines.collect::<Vec<_>>().join("\n").trim().to_string()
}

/// An H3C switch session in system view.
pub struct H3cSwitch<P: SerialPortAdapter> {
    session: SerialDut<P>,
    config: SwitchConfig,
    sysname: String,
    /// Any view prompt: `<sysname>`, `[sysname]` or `[sysname-...]`.
    prompt: Pattern,
    need_save: bool,
}

impl H3cSwitch<LoggedPort<TcpPort>> {
    /// Connect to `config.address` over telnet and log in.
    pub fn connect(config: &SwitchConfig) -> Result<Self, DeviceCommandError> {
        let address = config
            .address
            .clone()
            .ok_or_else(|| DeviceCommandError::NotFound("switch.address is not configured".into()))?;
        let timeout = config.timeout();
        let log = LogTarget::from_option(config.log_file.clone());
        let remote = address.clone();
        let session = SerialDut::new(
            address,
            Box::new(move || {
                let port = TcpPort::connect(&remote, timeout, true)?;
                LoggedPort::new(port, log.clone(), DEFAULT_READ_INTERVAL)
            }),
        );
        Self::login(session, config.clone())
    }
}

fn send_line<P: SerialPortAdapter>(session: &mut SerialDut<P>, line: &str) -> Result<(), DutError> {
    session.write(format!("{line}\r\n").as_bytes())
}

impl<P: SerialPortAdapter> H3cSwitch<P> {
    /// Log in on `session` (opening it if needed), disable paging and enter
    /// system view.
    pub fn login(mut session: SerialDut<P>, config: SwitchConfig) -> Result<Self, DeviceCommandError> {
        if !session.is_open() {
            session.open()?;
        }
        let timeout = config.timeout();
        let malformed = |e: regex::Error| DeviceCommandError::Malformed(e.to_string());

        session.expect(&Pattern::regex(r"(?:Login|Username):").map_err(malformed)?, timeout)?;
        send_line(&mut session, &config.username)?;
        session.expect_exact("Password:", timeout)?;
        send_line(&mut session, &config.password)?;

        let user_view = session.expect(&Pattern::regex(r"<([\w-]+)>").map_err(malformed)?, timeout)?;
        let sysname = user_view
            .group_str(1)
            .map(|s| s.into_owned())
            .ok_or_else(|| DeviceCommandError::Malformed(user_view.as_str().into_owned()))?;
        let prompt = Pattern::regex(&format!(r"[\[<]{}[^\]>\s]*[\]>]", regex::escape(&sysname)))
            .map_err(malformed)?;

        send_line(&mut session, "screen-length disable")?;
        session.expect_exact(&format!("<{sysname}>"), timeout)?;
        send_line(&mut session, "system-view")?;
        session.expect_exact(&format!("[{sysname}]"), timeout)?;
        info!(switch = session.name(), %sysname, "logged in to switch");

        Ok(Self {
            session,
            config,
            sysname,
            prompt,
            need_save: false,
        })
    }

    pub fn sysname(&self) -> &str {
        &self.sysname
    }

    /// Whether configuration changed since the last save.
    pub fn needs_save(&self) -> bool {
        self.need_save
    }

    /// Interface name for `target`, e.g. `GE1/0/3`.
    pub fn interface_name(&self, target: &SwitchTarget) -> String {
        format!("{}1/0/{}", self.config.interface_prefix, target.index)
    }

    /// Run `command` and return its output without echo and prompt.
    pub fn execute_command(&mut self, command: &str) -> Result<String, DeviceCommandError> {
        self.session.flush_data()?;
        send_line(&mut self.session, command)?;
        let found = self.session.expect(&self.prompt, self.config.timeout())?;
        let output = strip_echo(&String::from_utf8_lossy(&found.before), command);
        debug!(switch = self.session.name(), command, "command done");
        Ok(output)
    }

    /// Like [`execute_command`](Self::execute_command), failing when the
    /// switch reports a `%` error.
    fn configure(&mut self, command: &str) -> Result<String, DeviceCommandError> {
        let output = self.execute_command(command)?;
        if output.lines().any(|l| l.trim_start().starts_with('%')) {
            return Err(DeviceCommandError::UnexpectedReply {
                command: command.to_string(),
                reply: output,
            });
        }
        Ok(output)
    }

    /// Return to system view from wherever the shell is.
    pub fn system_view(&mut self) -> Result<(), DeviceCommandError> {
        let timeout = self.config.timeout();
        let system = format!("[{}]", self.sysname);
        self.session.flush_data()?;
        send_line(&mut self.session, "")?;
        let current = self.session.expect(&self.prompt, timeout)?.as_str().into_owned();
        if current == system {
            return Ok(());
        }
        let step = if current.starts_with('<') { "system-view" } else { "quit" };
        send_line(&mut self.session, step)?;
        self.session.expect_exact(&system, timeout)?;
        Ok(())
    }

    pub fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, DeviceCommandError> {
        let output = self.execute_command("display interface brief")?;
        let interfaces: Vec<_> = output.lines().filter_map(InterfaceInfo::parse_line).collect();
        info!("Get interface list: {} interfaces", interfaces.len());
        Ok(interfaces)
    }

    pub fn vlans(&mut self) -> Result<Vec<VlanInfo>, DeviceCommandError> {
        let output = self.execute_command("display interface Vlan-interface brief")?;
        let vlans: Vec<_> = output.lines().filter_map(VlanInfo::parse_line).collect();
        info!("Get vlan interface list: {} vlans", vlans.len());
        Ok(vlans)
    }

    fn check_target(&self, target: &SwitchTarget) -> Result<(), DeviceCommandError> {
        if target.address.is_empty() || target.address == self.session.name() {
            Ok(())
        } else {
            Err(DeviceCommandError::NotFound(format!(
                "{target} is not on switch {}",
                self.session.name()
            )))
        }
    }

    fn in_interface_view(&mut self, target: &SwitchTarget, command: &str) -> Result<(), DeviceCommandError> {
        self.check_target(target)?;
        let name = self.interface_name(target);
        self.system_view()?;
        let result = self
            .configure(&format!("interface {name}"))
            .and_then(|_| self.configure(command));
        self.system_view()?;
        result?;
        self.need_save = true;
        info!(interface = %name, command, "switch port configured");
        Ok(())
    }

    /// Persist the running configuration.
    pub fn save(&mut self) -> Result<(), DeviceCommandError> {
        send_line(&mut self.session, "save f")?;
        self.session.expect_exact("successfully.", SAVE_TIMEOUT)?;
        self.session.expect(&self.prompt, self.config.timeout())?;
        self.need_save = false;
        info!("Switch configuration saved successfully.");
        Ok(())
    }

    /// Save pending changes and close the session.
    pub fn disconnect(&mut self) -> Result<(), DeviceCommandError> {
        if !self.session.is_open() {
            return Ok(());
        }
        let saved = if self.need_save { self.save() } else { Ok(()) };
        self.session.close();
        info!("Disconnected from switch");
        saved
    }
}

impl<P: SerialPortAdapter> SwitchControl for H3cSwitch<P> {
    fn get_status(&mut self, target: &SwitchTarget) -> Result<InterfaceInfo, DeviceCommandError> {
        self.check_target(target)?;
        let name = self.interface_name(target);
        self.interfaces()?
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(&name))
            .ok_or(DeviceCommandError::NotFound(name))
    }

    fn set_port_enabled(&mut self, target: &SwitchTarget, enabled: bool) -> Result<(), DeviceCommandError> {
        self.in_interface_view(target, if enabled { "undo shutdown" } else { "shutdown" })
    }

    fn set_port_vlan(&mut self, target: &SwitchTarget, vlan: u16) -> Result<(), DeviceCommandError> {
        self.in_interface_view(target, &format!("port access vlan {vlan}"))
    }
}

impl<P: SerialPortAdapter> Drop for H3cSwitch<P> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("switch disconnect failed: {e}");
        }
    }
}
