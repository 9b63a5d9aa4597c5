use egui::Context;
use glam::Vec3;

use crate::controller::{EditMode, LocomotionState};

/// Numbers shown by the debug overlay, collected by the stage runtime each tick
#[derive(Debug, Clone, Default)]
pub struct OverlayStats {
    pub stage_name: String,
    pub fps: f32,
    pub player_pos: Option<Vec3>,
    pub locomotion: LocomotionState,
    pub grounded: bool,
    pub edit_mode: EditMode,
    pub selection: Option<String>,
    pub debug: bool,
}

/// Build the complete UI and return egui output
pub fn build_ui(egui_ctx: &Context, stats: &OverlayStats, canvas_width: u32, canvas_height: u32, now: f64) -> egui::FullOutput {
    let mut raw_input = egui::RawInput::default();
    raw_input.time = Some(now / 1000.0);
    raw_input.screen_rect = Some(egui::Rect::from_min_size(
        egui::Pos2::new(0.0, 0.0),
        egui::vec2(canvas_width as f32, canvas_height as f32),
    ));

    egui_ctx.run(raw_input, |ctx| {
        draw_stage_window(ctx, stats);
        if stats.debug {
            draw_editor_window(ctx, stats, canvas_width);
        }
    })
}

fn draw_stage_window(ctx: &Context, stats: &OverlayStats) {
    egui::Window::new("Stage")
        .default_pos([8.0, 8.0])
        .show(ctx, |ui| {
            ui.label(egui::RichText::new(&stats.stage_name).small().strong());
            ui.label(egui::RichText::new(format!("FPS: {:.0}", stats.fps)).small());
            match stats.player_pos {
                Some(p) => {
                    ui.label(egui::RichText::new(format!("Pos: x: {:.2} y: {:.2} z: {:.2}", p.x, p.y, p.z)).small());
                }
                None => {
                    ui.label(egui::RichText::new("No player").small());
                }
            }
            ui.label(
                egui::RichText::new(format!("State: {:?} (grounded: {})", stats.locomotion, stats.grounded)).small(),
            );
            ui.separator();
            ui.label(egui::RichText::new("Controls:").small());
            ui.label(egui::RichText::new("WASD - Move").small());
            ui.label(egui::RichText::new("Space - Jump").small());
            ui.label(egui::RichText::new("Right drag - Orbit camera").small());
            ui.label(egui::RichText::new("Esc - Back to story").small());
        });
}

fn draw_editor_window(ctx: &Context, stats: &OverlayStats, canvas_width: u32) {
    egui::Window::new("Editor")
        .default_pos([canvas_width as f32 - 180.0, 8.0])
        .default_size([170.0, 100.0])
        .show(ctx, |ui| {
            ui.label(egui::RichText::new(format!("Mode: {:?}", stats.edit_mode)).small());
            ui.label(
                egui::RichText::new(format!("Selected: {}", stats.selection.as_deref().unwrap_or("-"))).small(),
            );
            ui.separator();
            ui.label(egui::RichText::new("Click - Select").small());
            ui.label(egui::RichText::new("1/2/3 - Move/Rotate/Scale").small());
            ui.label(egui::RichText::new("Shift - Vertical axis").small());
            ui.label(egui::RichText::new("P - Export snapshot").small());
        });
}
