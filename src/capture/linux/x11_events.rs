//! X11 change notifications via the DAMAGE and XFIXES extensions

use crate::{
    capture::traits::{ChangeEvent, ChangeEventSource},
    error::{CaptureError, CaptureResult},
    types::{ChangeRegion, CursorImage, CursorPosition, SurfaceSize},
};

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::{
        damage::{self, ConnectionExt as DamageConnectionExt},
        xfixes::{self, ConnectionExt as XfixesConnectionExt},
        xproto::{self, ChangeWindowAttributesAux, ConnectionExt as XprotoConnectionExt, EventMask},
        Event,
    },
    rust_connection::RustConnection,
};

/// Subscription to damage, cursor and structure events on the root window
pub struct X11EventSource {
    connection: Arc<RustConnection>,
    root: xproto::Window,
    damage: damage::Damage,
    surface: SurfaceSize,
}

fn lost<E: std::fmt::Display>(e: E) -> CaptureError {
    CaptureError::ConnectionLost(e.to_string())
}

impl X11EventSource {
    /// Select structure and cursor notifications and create a raw-rectangle
    /// damage object on the root window
    pub(super) fn subscribe(
        connection: Arc<RustConnection>,
        screen_num: usize,
    ) -> CaptureResult<Self> {
        let screen = &connection.setup().roots[screen_num];
        let root = screen.root;
        let surface = SurfaceSize::new(
            screen.width_in_pixels as u32,
            screen.height_in_pixels as u32,
        );

        connection
            .change_window_attributes(
                root,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
            )
            .map_err(|e| CaptureError::PlatformError(format!("Select input error: {}", e)))?;

        require_extension(&connection, xfixes::X11_EXTENSION_NAME)?;
        connection
            .xfixes_query_version(5, 0)
            .map_err(|e| CaptureError::ExtensionMissing(format!("XFIXES: {}", e)))?
            .reply()
            .map_err(|e| CaptureError::ExtensionMissing(format!("XFIXES: {}", e)))?;
        connection
            .xfixes_select_cursor_input(root, xfixes::CursorNotifyMask::DISPLAY_CURSOR)
            .map_err(|e| CaptureError::PlatformError(format!("XFIXES cursor input: {}", e)))?;

        require_extension(&connection, damage::X11_EXTENSION_NAME)?;
        connection
            .damage_query_version(1, 1)
            .map_err(|e| CaptureError::ExtensionMissing(format!("DAMAGE: {}", e)))?
            .reply()
            .map_err(|e| CaptureError::ExtensionMissing(format!("DAMAGE: {}", e)))?;

        let damage = connection
            .generate_id()
            .map_err(|e| CaptureError::PlatformError(format!("Damage id: {}", e)))?;
        connection
            .damage_create(damage, root, damage::ReportLevel::RAW_RECTANGLES)
            .map_err(|e| CaptureError::PlatformError(format!("Damage create: {}", e)))?;
        connection.flush().map_err(lost)?;

        Ok(Self {
            connection,
            root,
            damage,
            surface,
        })
    }

    /// Last known root window size
    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    fn translate(&mut self, event: Event) -> Option<ChangeEvent> {
        match event {
            Event::DamageNotify(notify) => Some(ChangeEvent::Damage {
                region: ChangeRegion::from_origin_size(
                    notify.area.x as i32,
                    notify.area.y as i32,
                    notify.area.width as u32,
                    notify.area.height as u32,
                ),
                drawable: notify.drawable,
            }),
            Event::XfixesCursorNotify(_) => Some(ChangeEvent::CursorChange),
            Event::ConfigureNotify(configure) if configure.window == self.root => {
                self.surface = SurfaceSize::new(configure.width as u32, configure.height as u32);
                Some(ChangeEvent::Reconfigure {
                    width: self.surface.width,
                    height: self.surface.height,
                })
            }
            Event::Error(error) => {
                log::warn!("X11 error: {:?}", error);
                None
            }
            _ => None,
        }
    }

    /// Wait until the connection socket is readable or `timeout` passes
    fn wait_readable(&self, timeout: Duration) -> CaptureResult<()> {
        let mut pfd = libc::pollfd {
            fd: self.connection.stream().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pfd` is a single valid pollfd that outlives the call
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(lost(format!("poll: {}", err)));
        }
        if pfd.revents & libc::POLLIN == 0 && pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
            return Err(lost("X11 socket closed"));
        }
        Ok(())
    }
}

fn require_extension(connection: &RustConnection, name: &'static str) -> CaptureResult<()> {
    match connection.extension_information(name) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(CaptureError::ExtensionMissing(name.to_string())),
        Err(e) => Err(CaptureError::ExtensionMissing(format!("{}: {}", name, e))),
    }
}

impl ChangeEventSource for X11EventSource {
    fn next_event(&mut self, timeout: Duration) -> CaptureResult<Option<ChangeEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.connection.flush().map_err(lost)?;
            while let Some(event) = self.connection.poll_for_event().map_err(lost)? {
                if let Some(change) = self.translate(event) {
                    return Ok(Some(change));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.wait_readable(deadline - now)?;
        }
    }

    fn pointer_position(&mut self) -> CaptureResult<CursorPosition> {
        let reply = self
            .connection
            .query_pointer(self.root)
            .map_err(|e| CaptureError::CursorQueryFailed(format!("QueryPointer: {}", e)))?
            .reply()
            .map_err(|e| CaptureError::CursorQueryFailed(format!("QueryPointer reply: {}", e)))?;
        Ok(CursorPosition::new(reply.root_x as i32, reply.root_y as i32))
    }

    fn cursor_image(&mut self) -> CaptureResult<CursorImage> {
        let cursor = self
            .connection
            .xfixes_get_cursor_image()
            .map_err(|e| CaptureError::CursorQueryFailed(format!("XFIXES cursor: {}", e)))?
            .reply()
            .map_err(|e| CaptureError::CursorQueryFailed(format!("XFIXES cursor reply: {}", e)))?;

        Ok(CursorImage {
            x: cursor.x as i32,
            y: cursor.y as i32,
            width: cursor.width as u32,
            height: cursor.height as u32,
            xhot: cursor.xhot as u32,
            yhot: cursor.yhot as u32,
            serial: cursor.cursor_serial,
            pixels: cursor.cursor_image,
        })
    }

    fn surface_size(&self) -> SurfaceSize {
        self.surface
    }

    fn implementation_name(&self) -> String {
        "X11 DAMAGE/XFIXES".to_string()
    }
}

impl Drop for X11EventSource {
    fn drop(&mut self) {
        if let Err(e) = self.connection.damage_destroy(self.damage) {
            log::debug!("Damage destroy failed: {}", e);
        }
        if let Err(e) = self.connection.flush() {
            log::debug!("Flush after damage destroy failed: {}", e);
        }
    }
}
