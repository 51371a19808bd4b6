// src/server.rs
use tracing::{debug, error, info};

use crate::config::Config;
use crate::conn::Drive;
use crate::error::{ServerError, ServerResult};
use crate::slab::ConnectionSlab;
use crate::syscalls::{self, Epoll};
use crate::timer::{TimerQueue, TIMEOUT_DEFAULT};

/// Events processed per epoll_wait call.
const MAX_EVENTS: usize = 1024;
/// Connection slots; accepts beyond this are shed.
const SLAB_CAPACITY: usize = 1024;
/// Reserved epoll token for the listen socket.
const LISTEN_TOKEN: u64 = u64::MAX;

/// The single-threaded reactor. Owns the listen socket, the epoll instance,
/// the connection slab, and the idle-timer queue; everything runs on the
/// thread that calls `run`.
pub struct Server {
    cfg: Config,
    listen_fd: libc::c_int,
    epoll: Epoll,
    slab: ConnectionSlab,
    timers: TimerQueue,
}

impl Server {
    pub fn bind(cfg: Config) -> ServerResult<Self> {
        if !std::path::Path::new(&cfg.web_root).is_dir() {
            return Err(ServerError::WebRoot(cfg.web_root.clone().into()));
        }

        let listen_fd = syscalls::create_listen_socket(cfg.port)?;
        let epoll = Epoll::new()?;
        // The listener is edge-triggered but not one-shot: it stays armed
        // and the accept loop drains it on every notification.
        epoll.add(listen_fd, LISTEN_TOKEN, libc::EPOLLIN)?;

        Ok(Self {
            cfg,
            listen_fd,
            epoll,
            slab: ConnectionSlab::new(SLAB_CAPACITY),
            timers: TimerQueue::new(),
        })
    }

    /// The reactor loop. Never returns under normal operation.
    pub fn run(&mut self) -> ServerResult<()> {
        info!(
            port = self.cfg.port,
            web_root = %self.cfg.web_root,
            "server started"
        );

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        let mut expired: Vec<usize> = Vec::new();

        loop {
            let timeout = self.timers.next_timeout();
            let n = self.epoll.wait(&mut events, timeout)?;

            expired.clear();
            self.timers.expire(|token| expired.push(token));
            for &token in &expired {
                debug!(token, "idle timeout");
                Self::close_conn(&self.epoll, &mut self.slab, token);
            }

            for ev in &events[..n] {
                let token = ev.u64;
                if token == LISTEN_TOKEN {
                    self.accept_burst();
                    continue;
                }

                let idx = token as usize;
                let broken = ev.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
                let readable = ev.events & libc::EPOLLIN as u32 != 0;
                if broken || !readable {
                    error!(token = idx, "epoll error on connection");
                    Self::close_conn(&self.epoll, &mut self.slab, idx);
                    continue;
                }

                self.drive_conn(idx);
            }
        }
    }

    /// Edge-triggered accept: drain the queue to EAGAIN or readiness events
    /// can be lost.
    fn accept_burst(&mut self) {
        loop {
            match syscalls::accept_connection(self.listen_fd) {
                Ok(Some(fd)) => {
                    let idx = match self.slab.allocate(fd) {
                        Some(idx) => idx,
                        None => {
                            error!(fd, "connection slots exhausted, shedding");
                            syscalls::close(fd);
                            continue;
                        }
                    };

                    if let Err(e) =
                        self.epoll
                            .add(fd, idx as u64, libc::EPOLLIN | libc::EPOLLONESHOT)
                    {
                        error!(fd, error = %e, "epoll registration failed");
                        self.slab.free(idx);
                        syscalls::close(fd);
                        continue;
                    }

                    let handle = self.timers.schedule(idx, TIMEOUT_DEFAULT);
                    if let Some(conn) = self.slab.get_mut(idx) {
                        conn.timer = Some(handle);
                    }
                    debug!(fd, token = idx, "accepted connection");
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn drive_conn(&mut self, idx: usize) {
        let Server {
            epoll,
            slab,
            timers,
            cfg,
            ..
        } = self;

        let conn = match slab.get_mut(idx) {
            Some(c) if c.active => c,
            _ => return,
        };

        // Stop the idle clock while the connection is serviced; it is
        // re-armed together with the one-shot registration.
        conn.cancel_timer();

        match conn.drive(&cfg.web_root) {
            Drive::Rearm => {
                let fd = conn.fd;
                if let Err(e) = epoll.modify(fd, idx as u64, libc::EPOLLIN | libc::EPOLLONESHOT) {
                    error!(fd, error = %e, "failed to re-arm connection");
                    Self::close_conn(epoll, slab, idx);
                    return;
                }
                let handle = timers.schedule(idx, TIMEOUT_DEFAULT);
                if let Some(conn) = slab.get_mut(idx) {
                    conn.timer = Some(handle);
                }
            }
            Drive::Close => Self::close_conn(epoll, slab, idx),
        }
    }

    /// Tear down one connection: cancel its timer, drop the registration,
    /// close the fd, release the slot. The active check makes this a no-op
    /// for slots already torn down in the same iteration.
    fn close_conn(epoll: &Epoll, slab: &mut ConnectionSlab, token: usize) {
        let conn = match slab.get_mut(token) {
            Some(c) if c.active => c,
            _ => return,
        };

        conn.cancel_timer();
        let fd = conn.fd;
        epoll.delete(fd).ok();
        syscalls::close(fd);
        slab.free(token);
        debug!(fd, token, "connection closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        syscalls::close(self.listen_fd);
    }
}
