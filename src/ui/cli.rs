//! The interactive command line: a prompt on stdout, one command per line from stdin.

use std::io::{BufRead, Stdin, Stdout, Write};

use tracing::trace;

use super::{parse_command, DebuggerUI, Status};
use crate::errors::Result;
use crate::feedback::Feedback;

pub const PROMPT: &str = "> ";

/// Line oriented interface on a reader and a writer, usually stdin and stdout
pub struct CliUi<R, W> {
    input: R,
    output: W,
}

impl CliUi<std::io::StdinLock<'static>, Stdout> {
    pub fn build() -> Self {
        let stdin: Stdin = std::io::stdin();
        Self::new(stdin.lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> CliUi<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Prompts and reads one line, `None` at the end of the input
    pub fn get_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        write!(self.output, "{PROMPT}")?;
        self.output.flush()?;
        if self.input.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        let line = buf.trim_end_matches(['\n', '\r']).to_string();
        trace!("read command {line:?}");
        Ok(Some(line))
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> DebuggerUI for CliUi<R, W> {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        self.report(&feedback)?;
        loop {
            let Some(line) = self.get_line()? else {
                writeln!(self.output)?;
                return Ok(Status::DebuggerQuit);
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => writeln!(self.output, "command unknown")?,
                Err(e) => writeln!(self.output, "{e}")?,
            }
        }
    }

    fn report(&mut self, feedback: &Feedback) -> Result<()> {
        match feedback {
            Feedback::Ok => (),
            other => writeln!(self.output, "{other}")?,
        }
        self.output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::ui::Location;

    fn ui(input: &str) -> CliUi<Cursor<Vec<u8>>, Vec<u8>> {
        CliUi::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_reads_commands_in_order() {
        let mut ui = ui("b 8\nc\n");
        assert_eq!(
            ui.process(Feedback::Ok).unwrap(),
            Status::SetBreakpoint(Location::Line(8))
        );
        assert_eq!(ui.process(Feedback::Ok).unwrap(), Status::Continue);
        assert_eq!(String::from_utf8(ui.into_output()).unwrap(), "> > ");
    }

    #[test]
    fn test_end_of_input_quits() {
        let mut ui = ui("");
        assert_eq!(ui.process(Feedback::Ok).unwrap(), Status::DebuggerQuit);
        assert_eq!(String::from_utf8(ui.into_output()).unwrap(), "> \n");
    }

    #[test]
    fn test_unknown_and_bad_commands_reprompt() {
        let mut ui = ui("frobnicate\nb x:y\n\nq\n");
        assert_eq!(ui.process(Feedback::Ok).unwrap(), Status::DebuggerQuit);
        let out = String::from_utf8(ui.into_output()).unwrap();
        assert_eq!(
            out,
            "> command unknown\n> not a line number: \"y\" (invalid digit found in string)\n> > "
        );
    }

    #[test]
    fn test_feedback_is_shown_before_the_prompt() {
        let mut ui = ui("q\r\n");
        let status = ui
            .process(Feedback::Text("hello".to_string()))
            .unwrap();
        assert_eq!(status, Status::DebuggerQuit);
        assert_eq!(String::from_utf8(ui.into_output()).unwrap(), "hello\n> ");
    }
}
