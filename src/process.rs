use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

pub trait ToolRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, io::Error>;
}

pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, io::Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });

        let status = match timeout {
            None => child.wait()?,
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "{} did not finish within {}s",
                                program.display(),
                                limit.as_secs()
                            ),
                        ));
                    }
                    thread::sleep(Duration::from_millis(25));
                }
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        let status_code = status
            .code()
            .unwrap_or(if status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout,
            stderr,
        })
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn system_runner_captures_output() {
        let output = SystemRunner
            .run(
                Path::new("sh"),
                &["-c".to_string(), "echo 2.1.9 (tool); echo oops >&2".to_string()],
                Some(Duration::from_secs(5)),
            )
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text(), "2.1.9 (tool)");
        assert_eq!(output.stderr_text(), "oops");
    }

    #[test]
    fn system_runner_times_out() {
        let err = SystemRunner
            .run(
                Path::new("sh"),
                &["-c".to_string(), "sleep 5".to_string()],
                Some(Duration::from_millis(100)),
            )
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemRunner
            .run(Path::new("definitely-not-a-real-binary-xyz"), &[], None)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
