use crate::worker::channel::Channel;
use crate::worker::payload_channel::PayloadChannel;
use async_executor::Executor;
use async_fs::File as AsyncFile;
use async_process::unix::CommandExt;
use async_process::{Child, Command};
use nix::unistd;
use std::fs::File as StdFile;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::Arc;

pub(super) struct SpawnResult {
    pub(super) child: Child,
    pub(super) channel: Channel,
    pub(super) payload_channel: PayloadChannel,
}

/// One direction of a channel: a pipe whose engine end lands on a fixed descriptor.
#[derive(Copy, Clone)]
struct EnginePipe {
    engine_end: RawFd,
    local_end: RawFd,
    engine_fd: RawFd,
}

impl EnginePipe {
    /// Engine reads from `engine_fd`.
    fn towards_engine(engine_fd: RawFd) -> io::Result<Self> {
        let (read, write) = unistd::pipe()?;

        Ok(Self {
            engine_end: read,
            local_end: write,
            engine_fd,
        })
    }

    /// Engine writes to `engine_fd`.
    fn from_engine(engine_fd: RawFd) -> io::Result<Self> {
        let (read, write) = unistd::pipe()?;

        Ok(Self {
            engine_end: write,
            local_end: read,
            engine_fd,
        })
    }

    /// Runs in the child between fork and exec.
    fn install_in_child(self) -> io::Result<()> {
        unistd::close(self.local_end)?;
        if self.engine_end != self.engine_fd {
            unistd::dup2(self.engine_end, self.engine_fd)?;
            unistd::close(self.engine_end)?;
        }

        Ok(())
    }

    fn close_engine_end(self) -> io::Result<()> {
        unistd::close(self.engine_end)?;

        Ok(())
    }

    /// Takes ownership of the local descriptor, call once.
    fn local_file(self) -> AsyncFile {
        unsafe { StdFile::from_raw_fd(self.local_end) }.into()
    }
}

/// Spawns the engine with control channel on fds 3 (engine reads) and 4 (engine writes), payload
/// channel on fds 5 and 6.
pub(super) fn spawn_with_worker_channels(
    executor: Arc<Executor<'static>>,
    command: &mut Command,
) -> io::Result<SpawnResult> {
    let pipes = [
        EnginePipe::towards_engine(3)?,
        EnginePipe::from_engine(4)?,
        EnginePipe::towards_engine(5)?,
        EnginePipe::from_engine(6)?,
    ];

    unsafe {
        command.pre_exec(move || pipes.iter().try_for_each(|pipe| pipe.install_in_child()));
    }

    let [channel_writer, channel_reader, payload_channel_writer, payload_channel_reader] =
        pipes.map(EnginePipe::local_file);

    let child = command.spawn()?;

    for pipe in pipes {
        pipe.close_engine_end()?;
    }

    Ok(SpawnResult {
        child,
        channel: Channel::new(Arc::clone(&executor), channel_reader, channel_writer),
        payload_channel: PayloadChannel::new(executor, payload_channel_reader, payload_channel_writer),
    })
}
