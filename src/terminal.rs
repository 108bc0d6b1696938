// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based scanner
//!
//! Renders the camera preview to the terminal using Unicode half-block
//! characters, with the scan frame drawn on top. The frame is mapped to the
//! decoder's region of interest so only codes inside it are reported.

use crate::backends::camera::types::{CameraFrame, FrameReceiver};
use crate::backends::camera::CaptureService;
use crate::backends::permission::PermissionAuthority;
use crate::config::Config;
use crate::constants::{scan_frame, timing, zoom};
use crate::scanner::geometry::{self, InterfaceOrientation, PreviewLayer, Size, VideoGravity};
use crate::scanner::{
    Alert, DecodedResult, MetadataDecoder, PayloadAction, PermissionState, ScanSessionController,
    ScanState, orientation,
};

use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Clear, Paragraph, Widget, Wrap},
};
use std::io::{self, stdout};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Height of a terminal cell relative to its width
const CELL_ASPECT: f32 = 2.0;

/// Lines below the preview: result panel and status bar
const RESULT_LINES: u16 = 2;

/// How the scanner screen presents the preview
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenOptions {
    /// Scan frame side as a fraction of the preview's shorter side
    pub scan_frame_size: f32,
    pub gravity: VideoGravity,
    pub mirrored: bool,
}

impl From<&Config> for ScreenOptions {
    fn from(config: &Config) -> Self {
        Self {
            scan_frame_size: config.scan_frame_size,
            gravity: config.preview_gravity,
            mirrored: config.mirror_preview,
        }
    }
}

/// Run the terminal scanner until the user quits
///
/// The session is stopped before returning.
pub fn run<S, D, A>(
    controller: &mut ScanSessionController<S, D, A>,
    options: ScreenOptions,
    runtime: &Handle,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: CaptureService,
    D: MetadataDecoder,
    A: PermissionAuthority,
{
    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, controller, options, runtime);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    controller.stop();
    let stopped = runtime.block_on(tokio::time::timeout(
        std::time::Duration::from_secs(timing::STOP_TIMEOUT_SECS),
        controller.idle(),
    ));
    if stopped.is_err() {
        warn!("Timed out waiting for the scan session to stop");
    }

    result
}

fn run_app<S, D, A>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    controller: &mut ScanSessionController<S, D, A>,
    options: ScreenOptions,
    runtime: &Handle,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: CaptureService,
    D: MetadataDecoder,
    A: PermissionAuthority,
{
    let mut orientation_rx = orientation::watch_orientation(runtime);
    let mut screen = ScannerScreen::new(options);
    let mut preview: Option<FrameReceiver> = None;

    if let Err(e) = controller.activate() {
        warn!(error = %e, "Scanner not started");
    }

    loop {
        controller.process_pending_events();

        // The permission prompt was answered after the first activation
        if controller.permission() == PermissionState::Granted
            && *controller.state() == ScanState::Uninitialized
            && let Err(e) = controller.activate()
        {
            warn!(error = %e, "Scanner not started");
        }

        if !controller.is_configured() {
            preview = None;
        } else if preview.is_none() {
            preview = controller.take_preview_frames();
        }
        // Drain all available frames to get latest
        if let Some(frames) = preview.as_mut() {
            let mut latest = None;
            while let Ok(frame) = frames.try_recv() {
                latest = Some(frame);
            }
            // The last frame stays on screen after a stop, don't pin pipeline buffers
            if let Some(frame) = latest {
                screen.update_frame(frame.to_copied());
            }
        }

        if orientation_rx.has_changed().unwrap_or(false) {
            let orientation = *orientation_rx.borrow_and_update();
            if orientation != InterfaceOrientation::Unknown {
                info!(?orientation, "Device orientation changed");
                screen.orientation = orientation;
                controller.set_orientation(orientation);
            }
        }

        let mut layout = None;
        terminal.draw(|f| layout = screen.draw(f, controller))?;
        if let Some((layer, rect)) = layout {
            controller.set_preview_layout(layer);
            if screen.scan_rect != Some(rect) {
                screen.scan_rect = Some(rect);
                let roi = controller.update_region_of_interest(rect);
                debug!(?roi, "Scan frame moved");
            }
        }

        if !event::poll(timing::UI_POLL_INTERVAL)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if screen.handle_key(key, controller) {
                    break;
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => {
                    controller.zoom_by(zoom::KEY_VELOCITY);
                }
                MouseEventKind::ScrollDown => {
                    controller.zoom_by(-zoom::KEY_VELOCITY);
                }
                _ => {}
            },
            Event::FocusLost => {
                if controller.is_running() {
                    debug!("Terminal lost focus, pausing scanner");
                    controller.stop();
                    screen.resume_on_focus = true;
                }
            }
            Event::FocusGained => {
                if std::mem::take(&mut screen.resume_on_focus) {
                    debug!("Terminal focused, resuming scanner");
                    controller.start();
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// State of the scanner screen that isn't owned by the controller
struct ScannerScreen {
    options: ScreenOptions,
    frame: Option<CameraFrame>,
    orientation: InterfaceOrientation,
    /// Scan frame last handed to the controller, in preview cells
    scan_rect: Option<geometry::Rect>,
    /// Scanning was paused because the terminal lost focus
    resume_on_focus: bool,
    /// One-off message replacing the key hints
    notice: Option<String>,
}

impl ScannerScreen {
    fn new(options: ScreenOptions) -> Self {
        Self {
            options,
            frame: None,
            orientation: InterfaceOrientation::Unknown,
            scan_rect: None,
            resume_on_focus: false,
            notice: None,
        }
    }

    fn update_frame(&mut self, frame: CameraFrame) {
        self.frame = Some(frame);
    }

    /// Preview layer for `area`, once a frame told us the video size
    fn preview_layer(&self, area: Rect) -> Option<PreviewLayer> {
        let frame = self.frame.as_ref()?;
        let mut layer = PreviewLayer::new(
            Size::new(area.width as f32, area.height as f32),
            Size::new(frame.width as f32, frame.height as f32),
        );
        layer.gravity = self.options.gravity;
        layer.orientation = self.orientation.into();
        layer.mirrored = self.options.mirrored;
        layer.pixel_aspect = CELL_ASPECT;
        Some(layer)
    }

    /// Scan frame centred in `area`, in cells relative to the area
    fn scan_frame(&self, area: Rect) -> geometry::Rect {
        geometry::Rect::centered_square(
            Size::new(area.width as f32, area.height as f32),
            self.options.scan_frame_size,
            CELL_ASPECT,
        )
    }

    /// Draw the screen, returning the preview geometry it used
    fn draw<S, D, A>(
        &self,
        f: &mut Frame,
        controller: &ScanSessionController<S, D, A>,
    ) -> Option<(PreviewLayer, geometry::Rect)>
    where
        S: CaptureService,
        D: MetadataDecoder,
        A: PermissionAuthority,
    {
        let area = f.area();
        let reserved = RESULT_LINES + 1;

        // Preview on top, result panel and status bar at the bottom
        let preview_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height: area.height.saturating_sub(reserved),
        };
        let result_area = Rect {
            x: area.x,
            y: area.y + preview_area.height,
            width: area.width,
            height: RESULT_LINES.min(area.height.saturating_sub(1)),
        };
        let status_area = Rect {
            x: area.x,
            y: area.height.saturating_sub(1),
            width: area.width,
            height: 1,
        };

        let layer = self.preview_layer(preview_area);
        let rect = self.scan_frame(preview_area);
        let result = controller.scanned_code();
        let state = controller.state();

        f.render_widget(
            PreviewWidget {
                frame: self.frame.as_ref(),
                layer: layer.as_ref(),
                placeholder: placeholder_text(state),
            },
            preview_area,
        );
        f.render_widget(
            ScanFrameWidget {
                rect,
                color: if result.is_some() {
                    Color::Green
                } else {
                    Color::White
                },
            },
            preview_area,
        );
        f.render_widget(
            ResultPanel {
                result: result.as_ref(),
                state,
            },
            result_area,
        );

        let message = self.status_message(controller);
        f.render_widget(StatusBar { message: &message }, status_area);

        if let Some(alert) = controller.alert() {
            f.render_widget(AlertPopup { alert }, area);
        }

        layer.map(|layer| (layer, rect))
    }

    fn status_message<S, D, A>(&self, controller: &ScanSessionController<S, D, A>) -> String
    where
        S: CaptureService,
        D: MetadataDecoder,
        A: PermissionAuthority,
    {
        let device = controller
            .device()
            .map(|d| d.name.as_str())
            .unwrap_or("No camera");
        let hints = self
            .notice
            .as_deref()
            .unwrap_or("space scan  s stop  +/- zoom  r rotate  o open  q quit");
        format!(
            " {} │ {} │ {:.1}x │ {}",
            controller.state().label(),
            device,
            controller.zoom_factor(),
            hints
        )
    }

    /// Handle a key press, returning true to quit
    fn handle_key<S, D, A>(
        &mut self,
        key: KeyEvent,
        controller: &mut ScanSessionController<S, D, A>,
    ) -> bool
    where
        S: CaptureService,
        D: MetadataDecoder,
        A: PermissionAuthority,
    {
        self.notice = None;

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Esc => controller.dismiss_alert(),
            KeyCode::Char(' ') | KeyCode::Enter => {
                if controller.alert().is_some() {
                    controller.dismiss_alert();
                } else {
                    controller.start();
                }
            }
            KeyCode::Char('s') => controller.stop(),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                controller.zoom_by(zoom::KEY_VELOCITY);
            }
            KeyCode::Char('-') => {
                controller.zoom_by(-zoom::KEY_VELOCITY);
            }
            KeyCode::Char('r') => {
                self.orientation = self.orientation.rotated_clockwise();
                controller.set_orientation(self.orientation);
            }
            KeyCode::Char('o') => self.open_result(controller.scanned_code()),
            KeyCode::Char('c') => {
                if matches!(controller.state(), ScanState::Failed(_)) {
                    controller.dismiss_alert();
                    match controller.activate() {
                        Ok(()) => info!("Scanner reconfigured"),
                        Err(e) => warn!(error = %e, "Retry failed"),
                    }
                }
            }
            _ => {}
        }
        false
    }

    fn open_result(&mut self, result: Option<DecodedResult>) {
        let Some(result) = result else {
            return;
        };
        let action = PayloadAction::parse(&result.payload);
        let Some(target) = action.open_target() else {
            self.notice = Some(format!("Nothing to open for {}", action.action_label()));
            return;
        };

        match open::that_detached(&target) {
            Ok(()) => {
                info!(target = %target, "Opened scanned code");
                self.notice = Some(format!("Opened {}", target));
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to open scanned code");
                self.notice = Some(format!("Failed to open: {}", e));
            }
        }
    }
}

fn placeholder_text(state: &ScanState) -> &'static str {
    match state {
        ScanState::Uninitialized => "Waiting for camera access...",
        ScanState::PermissionDenied => "Camera access is disabled",
        ScanState::Configuring => "Setting up camera...",
        ScanState::Failed(_) => "Camera unavailable",
        ScanState::Idle | ScanState::Running | ScanState::Detected => "Waiting for camera...",
    }
}

/// Widget that renders a camera frame using half-block characters
struct PreviewWidget<'a> {
    frame: Option<&'a CameraFrame>,
    layer: Option<&'a PreviewLayer>,
    placeholder: &'a str,
}

impl Widget for PreviewWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (Some(frame), Some(layer)) = (self.frame, self.layer) else {
            let width = self.placeholder.chars().count() as u16;
            let x = area.x + area.width.saturating_sub(width) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height {
                buf.set_stringn(
                    x,
                    y,
                    self.placeholder,
                    area.width as usize,
                    Style::default(),
                );
            }
            return;
        };

        // Each cell shows two pixels: the upper half in the foreground
        // colour of '▀', the lower half in the background colour
        for cy in 0..area.height {
            for cx in 0..area.width {
                let x = cx as f32 + 0.5;
                let top = sample(frame, layer, x, cy as f32 + 0.25);
                let bottom = sample(frame, layer, x, cy as f32 + 0.75);
                if let Some(cell) = buf.cell_mut((area.x + cx, area.y + cy)) {
                    cell.set_char('▀');
                    cell.set_fg(top);
                    cell.set_bg(bottom);
                }
            }
        }
    }
}

/// Colour of the frame pixel shown at view point (x, y)
fn sample(frame: &CameraFrame, layer: &PreviewLayer, x: f32, y: f32) -> Color {
    match layer.view_point_to_frame(x, y) {
        Some((u, v)) if (0.0..1.0).contains(&u) && (0.0..1.0).contains(&v) => {
            let px = (u * frame.width as f32) as u32;
            let py = (v * frame.height as f32) as u32;
            let (r, g, b) = frame.rgb_at(px, py);
            Color::Rgb(r, g, b)
        }
        _ => Color::Black,
    }
}

/// Corner brackets marking the scan frame
struct ScanFrameWidget {
    /// Frame in cells relative to the preview area
    rect: geometry::Rect,
    color: Color,
}

impl Widget for ScanFrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let left = area.x + self.rect.x.round().max(0.0) as u16;
        let top = area.y + self.rect.y.round().max(0.0) as u16;
        let right = (area.x + (self.rect.x + self.rect.width).round().max(0.0) as u16)
            .saturating_sub(1)
            .min(area.right().saturating_sub(1));
        let bottom = (area.y + (self.rect.y + self.rect.height).round().max(0.0) as u16)
            .saturating_sub(1)
            .min(area.bottom().saturating_sub(1));
        if right <= left || bottom <= top {
            return;
        }

        let arm_x = ((self.rect.width * scan_frame::CORNER_FRACTION).round() as u16).max(1);
        let arm_y = ((self.rect.height * scan_frame::CORNER_FRACTION).round() as u16).max(1);
        let mut put = |x: u16, y: u16, ch: char| {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.set_char(ch);
                cell.set_fg(self.color);
            }
        };

        put(left, top, '┌');
        put(right, top, '┐');
        put(left, bottom, '└');
        put(right, bottom, '┘');
        for i in 1..=arm_x.min((right - left) / 2) {
            put(left + i, top, '─');
            put(right - i, top, '─');
            put(left + i, bottom, '─');
            put(right - i, bottom, '─');
        }
        for i in 1..=arm_y.min((bottom - top) / 2) {
            put(left, top + i, '│');
            put(right, top + i, '│');
            put(left, bottom - i, '│');
            put(right, bottom - i, '│');
        }
    }
}

/// Decoded payload and what can be done with it
struct ResultPanel<'a> {
    result: Option<&'a DecodedResult>,
    state: &'a ScanState,
}

impl Widget for ResultPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let width = area.width as usize;

        let Some(result) = self.result else {
            let hint = match self.state {
                ScanState::Running => "Point the camera at a code",
                ScanState::Idle => "Press space to scan",
                _ => "",
            };
            buf.set_stringn(area.x + 1, area.y, hint, width, Style::default().fg(Color::Gray));
            return;
        };

        // Multi-line payloads show their first line only
        let first_line = result.payload.lines().next().unwrap_or_default();
        let heading = format!("[{}] {}", result.symbology, first_line);
        buf.set_stringn(
            area.x + 1,
            area.y,
            &heading,
            width.saturating_sub(1),
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        );

        if area.height < 2 {
            return;
        }
        let action = PayloadAction::parse(&result.payload);
        let detail = match &action {
            PayloadAction::Wifi { ssid, security, .. } => {
                format!("Wi-Fi network \"{}\" ({})", ssid, security)
            }
            _ if action.open_target().is_some() => format!("o: {}", action.action_label()),
            _ => action.action_label().to_string(),
        };
        let scanned_at = result.scanned_at.format("%H:%M:%S");
        let line = format!("{}  │  scanned {}  │  space: scan again", detail, scanned_at);
        buf.set_stringn(
            area.x + 1,
            area.y + 1,
            &line,
            width.saturating_sub(1),
            Style::default().fg(Color::Gray),
        );
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        buf.set_stringn(
            area.x,
            area.y,
            self.message,
            area.width as usize,
            Style::default().fg(Color::White).bg(Color::DarkGray),
        );
    }
}

/// Modal box for permission and setup problems
struct AlertPopup<'a> {
    alert: &'a Alert,
}

impl Widget for AlertPopup<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let width = area.width.saturating_sub(4).min(60);
        let height = area.height.min(8);
        let popup = Rect {
            x: area.x + (area.width - width) / 2,
            y: area.y + (area.height - height) / 2,
            width,
            height,
        };

        Clear.render(popup, buf);
        let lines = vec![
            Line::from(self.alert.message()),
            Line::from(""),
            Line::styled(self.alert.hint(), Style::default().fg(Color::Gray)),
            Line::from(""),
            Line::styled("Esc: dismiss", Style::default().fg(Color::DarkGray)),
        ];
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(
                Block::bordered()
                    .title(self.alert.title())
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .render(popup, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScanError;

    fn screen() -> ScannerScreen {
        ScannerScreen::new(ScreenOptions {
            scan_frame_size: 0.5,
            gravity: VideoGravity::AspectFit,
            mirrored: false,
        })
    }

    #[test]
    fn test_scan_frame_is_square_on_screen() {
        let rect = screen().scan_frame(Rect::new(0, 0, 80, 20));
        // 20 rows are 40 square units tall, half of that is the side
        assert_eq!(rect.width, 20.0);
        assert_eq!(rect.height, 10.0);
        assert_eq!(rect.x, 30.0);
        assert_eq!(rect.y, 5.0);
    }

    #[test]
    fn test_no_layer_before_first_frame() {
        let mut screen = screen();
        assert!(screen.preview_layer(Rect::new(0, 0, 80, 20)).is_none());

        screen.update_frame(CameraFrame::from_rgba(4, 2, vec![0; 32]));
        let layer = screen.preview_layer(Rect::new(0, 0, 80, 20)).unwrap();
        assert_eq!(layer.frame_size, Size::new(4.0, 2.0));
        assert_eq!(layer.pixel_aspect, CELL_ASPECT);
    }

    #[test]
    fn test_preview_fills_cells_with_half_blocks() {
        let frame = CameraFrame::from_rgba(2, 2, [[255, 0, 0, 255]; 4].concat());
        let mut layer = PreviewLayer::new(Size::new(2.0, 1.0), Size::new(2.0, 2.0));
        layer.pixel_aspect = CELL_ASPECT;

        let area = Rect::new(0, 0, 2, 1);
        let mut buf = Buffer::empty(area);
        PreviewWidget {
            frame: Some(&frame),
            layer: Some(&layer),
            placeholder: "",
        }
        .render(area, &mut buf);

        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(255, 0, 0));
    }

    #[test]
    fn test_scan_frame_draws_corners() {
        let area = Rect::new(0, 0, 20, 10);
        let mut buf = Buffer::empty(area);
        ScanFrameWidget {
            rect: geometry::Rect::new(2.0, 2.0, 10.0, 5.0),
            color: Color::White,
        }
        .render(area, &mut buf);

        assert_eq!(buf[(2, 2)].symbol(), "┌");
        assert_eq!(buf[(11, 2)].symbol(), "┐");
        assert_eq!(buf[(2, 6)].symbol(), "└");
        assert_eq!(buf[(11, 6)].symbol(), "┘");
        assert_eq!(buf[(3, 2)].symbol(), "─");
    }

    #[test]
    fn test_placeholder_follows_state() {
        assert_eq!(
            placeholder_text(&ScanState::PermissionDenied),
            "Camera access is disabled"
        );
        assert_eq!(
            placeholder_text(&ScanState::Failed(ScanError::NoDeviceFound)),
            "Camera unavailable"
        );
    }
}
