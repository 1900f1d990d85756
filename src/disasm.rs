use log::debug;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Turns one instruction word into a comment for the emitted assembly.
///
/// Returning `None` is not an error for callers: the word is emitted without a comment.
pub trait Disassembler: Sync {
    fn disassemble(&self, word: u32, address: u32) -> Option<String>;
}

/// Runs `m68kdasm` in PowerPC mode once per word.
#[derive(Debug, Clone)]
pub struct M68kDasm {
    program: PathBuf,
}

impl M68kDasm {
    pub fn new<P: Into<PathBuf>>(program: P) -> M68kDasm {
        M68kDasm {
            program: program.into(),
        }
    }

    fn run(&self, word: u32, address: u32) -> io::Result<String> {
        let mut child = Command::new(&self.program)
            .arg(format!("--start-address={:#x}", address))
            .arg("--ppc32")
            .arg("--parse-data")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // reap the child even when it stops reading before we finish writing
        let written = match child.stdin.take() {
            Some(mut stdin) => write!(stdin, "{:08X}", word),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        written?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("exited with {}", output.status),
            ));
        }
        String::from_utf8(output.stdout)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

impl Disassembler for M68kDasm {
    fn disassemble(&self, word: u32, address: u32) -> Option<String> {
        match self.run(word, address) {
            Ok(output) => {
                let text = instruction_text(&output).map(str::to_owned);
                if text.is_none() {
                    debug!("{:08X}: unexpected disassembler output {:?}", address, output);
                }
                text
            }
            Err(err) => {
                debug!("{:08X}: disassembler failed: {}", address, err);
                None
            }
        }
    }
}

/// Strips the leading address and opcode columns from a disassembler line.
fn instruction_text(output: &str) -> Option<&str> {
    let (_address, rest) = output.trim().split_once(char::is_whitespace)?;
    let (_opcode, rest) = rest.trim_start().split_once(char::is_whitespace)?;
    Some(rest.trim_start())
}

/// Leaves every word unannotated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDisassembly;

impl Disassembler for NoDisassembly {
    fn disassemble(&self, _word: u32, _address: u32) -> Option<String> {
        None
    }
}
