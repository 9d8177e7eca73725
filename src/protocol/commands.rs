//! # Console Command Encoder
//!
//! Builds the ASCII command lines the capture engine sends to the controller.
//! The console gives no per-command acknowledgement, so sequences are plain
//! ordered lists that the engine writes one after another.

use std::fmt;

/// Line terminator expected by the MESC console
pub const LINE_ENDING: &str = "\r\n";

/// Outbound console command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Trigger a one-shot phase snapshot (`phasesnap`)
    PhaseSnapshot,
    /// Reset the log configuration, which also stops streaming (`log -r`)
    LogReset,
    /// Add a channel to the log stream (`log -a <name>`)
    LogAdd(String),
    /// Set the log interval in milliseconds (`log -s <ms>`)
    LogInterval(u64),
    /// Set the UART current request in amperes (`set uart_req <A>`)
    CurrentRequest(f32),
    /// Set the UART d-axis current request in amperes (`set uart_dreq <A>`)
    DirectCurrentRequest(f32),
    /// Any other console line, sent verbatim
    Raw(String),
}

impl Command {
    /// Encode the command as terminated wire bytes
    ///
    /// # Examples
    ///
    /// ```
    /// use mesc_capture::protocol::Command;
    ///
    /// assert_eq!(Command::LogAdd("vbus".into()).encode(), b"log -a vbus\r\n");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.to_string();
        line.push_str(LINE_ENDING);
        line.into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PhaseSnapshot => write!(f, "phasesnap"),
            Command::LogReset => write!(f, "log -r"),
            Command::LogAdd(name) => write!(f, "log -a {}", name),
            Command::LogInterval(ms) => write!(f, "log -s {}", ms),
            // Halt values go out as a bare "0"
            Command::CurrentRequest(amps) if *amps == 0.0 => write!(f, "set uart_req 0"),
            Command::CurrentRequest(amps) => write!(f, "set uart_req {:.2}", amps),
            Command::DirectCurrentRequest(amps) if *amps == 0.0 => write!(f, "set uart_dreq 0"),
            Command::DirectCurrentRequest(amps) => write!(f, "set uart_dreq {:.2}", amps),
            Command::Raw(text) => write!(f, "{}", text.trim_end_matches(['\r', '\n'])),
        }
    }
}

/// Commands that configure and start a log stream
///
/// Order matters: reset first so stale channels from an earlier session do
/// not leak into the schema, then add channels, then set the interval.
pub fn stream_setup_sequence(channels: &[String], interval_ms: u64) -> Vec<Command> {
    let mut commands = Vec::with_capacity(channels.len() + 2);
    commands.push(Command::LogReset);
    commands.extend(channels.iter().cloned().map(Command::LogAdd));
    commands.push(Command::LogInterval(interval_ms));
    commands
}

/// Commands that stop a running log stream
pub fn stream_stop_sequence() -> Vec<Command> {
    vec![Command::LogReset]
}

/// Commands that zero every motor request
pub fn emergency_stop_sequence() -> Vec<Command> {
    vec![
        Command::CurrentRequest(0.0),
        Command::DirectCurrentRequest(0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_phase_snapshot() {
        assert_eq!(Command::PhaseSnapshot.encode(), b"phasesnap\r\n");
    }

    #[test]
    fn test_log_commands_text() {
        assert_eq!(Command::LogReset.to_string(), "log -r");
        assert_eq!(Command::LogAdd("Iu_avg".into()).to_string(), "log -a Iu_avg");
        assert_eq!(Command::LogInterval(250).to_string(), "log -s 250");
    }

    #[test]
    fn test_current_request_formatting() {
        assert_eq!(Command::CurrentRequest(12.5).to_string(), "set uart_req 12.50");
        assert_eq!(Command::CurrentRequest(-3.0).to_string(), "set uart_req -3.00");
        assert_eq!(Command::CurrentRequest(0.0).to_string(), "set uart_req 0");
    }

    #[test]
    fn test_raw_command_strips_existing_terminator() {
        let cmd = Command::Raw("status start\r\n".into());
        assert_eq!(cmd.encode(), b"status start\r\n");
    }

    #[test]
    fn test_stream_setup_sequence_order() {
        let channels = vec!["vbus".to_string(), "Iu_avg".to_string()];
        let seq = stream_setup_sequence(&channels, 100);

        assert_eq!(
            seq,
            vec![
                Command::LogReset,
                Command::LogAdd("vbus".into()),
                Command::LogAdd("Iu_avg".into()),
                Command::LogInterval(100),
            ]
        );
    }

    #[test]
    fn test_stop_and_estop_sequences() {
        assert_eq!(stream_stop_sequence(), vec![Command::LogReset]);

        let estop: Vec<String> = emergency_stop_sequence().iter().map(|c| c.to_string()).collect();
        assert_eq!(estop, vec!["set uart_req 0", "set uart_dreq 0"]);
    }
}
