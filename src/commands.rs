//! Outbound command sources: a fixed script, or a script followed by live
//! line input.

use std::collections::VecDeque;

use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::errors::Result;
use crate::protocol::DeviceCommand;

/// Where a command came from; scripted commands are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Scripted,
    Typed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub text: String,
    pub origin: Origin,
    /// Parsed form, `None` when the watch does not know the command. Such
    /// commands are still sent verbatim.
    pub command: Option<DeviceCommand>,
}

impl OutboundCommand {
    fn new(text: String, origin: Origin) -> Self {
        let command = match text.parse::<DeviceCommand>() {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                warn!("{e}; sending anyway, the watch will likely ignore it");
                None
            }
        };
        Self {
            text,
            origin,
            command,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

type LineReader = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

pub enum CommandSource {
    /// One-shot mode: the script, then nothing.
    Fixed(VecDeque<String>),
    /// The script first, then non-blank lines until end of input.
    Interactive {
        script: VecDeque<String>,
        lines: LineReader,
    },
}

impl CommandSource {
    pub fn fixed<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSource::Fixed(commands.into_iter().map(Into::into).collect())
    }

    pub fn interactive<I, S, R>(commands: I, input: R) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(input);
        CommandSource::Interactive {
            script: commands.into_iter().map(Into::into).collect(),
            lines: reader.lines(),
        }
    }

    /// Interactive source reading the process's standard input.
    pub fn stdin<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::interactive(commands, BufReader::new(tokio::io::stdin()))
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, CommandSource::Interactive { .. })
    }

    /// Next command, or `None` once the source is exhausted.
    ///
    /// Cancel-safe between lines: dropping the future while it waits for
    /// input loses no already-read command.
    pub async fn next_command(&mut self) -> Result<Option<OutboundCommand>> {
        match self {
            CommandSource::Fixed(script) => Ok(script.pop_front().map(scripted)),
            CommandSource::Interactive { script, lines } => {
                if let Some(text) = script.pop_front() {
                    return Ok(Some(scripted(text)));
                }
                while let Some(line) = lines.next_line().await? {
                    let text = line.trim_end_matches(['\r', '\n']);
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(OutboundCommand::new(text.to_string(), Origin::Typed)));
                }
                Ok(None)
            }
        }
    }
}

fn scripted(text: String) -> OutboundCommand {
    OutboundCommand::new(text, Origin::Scripted)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(source: &mut CommandSource) -> Vec<OutboundCommand> {
        let mut out = Vec::new();
        while let Some(cmd) = source.next_command().await.unwrap() {
            out.push(cmd);
        }
        out
    }

    fn texts(cmds: &[OutboundCommand]) -> Vec<&str> {
        cmds.iter().map(|c| c.text.as_str()).collect()
    }

    #[tokio::test]
    async fn fixed_list_is_consumed_once_in_order() {
        let mut source = CommandSource::fixed(["PING", "REC"]);
        assert!(!source.is_interactive());
        let cmds = drain(&mut source).await;
        assert_eq!(texts(&cmds), ["PING", "REC"]);
        assert!(cmds.iter().all(|c| c.origin == Origin::Scripted));
        assert_eq!(source.next_command().await.unwrap(), None);
    }

    #[tokio::test]
    async fn interactive_runs_script_then_lines() {
        let input: &[u8] = b"SETREC:3\n\n   \r\nGET:1:0:200\r\nREC";
        let mut source = CommandSource::interactive(["PING"], input);
        assert!(source.is_interactive());
        let cmds = drain(&mut source).await;
        assert_eq!(texts(&cmds), ["PING", "SETREC:3", "GET:1:0:200", "REC"]);
        assert_eq!(cmds[0].origin, Origin::Scripted);
        assert!(cmds[1..].iter().all(|c| c.origin == Origin::Typed));
    }

    #[tokio::test]
    async fn lines_are_sent_verbatim_even_if_unknown() {
        let input: &[u8] = b"  hello watch \n";
        let mut source = CommandSource::interactive(Vec::<String>::new(), input);
        let cmds = drain(&mut source).await;
        assert_eq!(texts(&cmds), ["  hello watch "]);
    }

    #[tokio::test]
    async fn empty_input_ends_immediately() {
        let input: &[u8] = b"";
        let mut source = CommandSource::interactive(Vec::<String>::new(), input);
        assert_eq!(source.next_command().await.unwrap(), None);
    }

    #[tokio::test]
    async fn every_command_is_checked_against_the_watch_vocabulary() {
        let input: &[u8] = b"SETREC:3\nHELLO\n";
        let mut source = CommandSource::interactive(["HELLO", "PING"], input);
        let parsed: Vec<_> = drain(&mut source)
            .await
            .into_iter()
            .map(|c| (c.origin, c.command))
            .collect();
        assert_eq!(
            parsed,
            [
                (Origin::Scripted, None),
                (Origin::Scripted, Some(DeviceCommand::Ping)),
                (Origin::Typed, Some(DeviceCommand::SetRec(3))),
                (Origin::Typed, None),
            ]
        );

        let mut fixed = CommandSource::fixed(["HELLO"]);
        let cmd = fixed.next_command().await.unwrap().unwrap();
        assert_eq!(cmd.text, "HELLO");
        assert_eq!(cmd.command, None);
    }
}
