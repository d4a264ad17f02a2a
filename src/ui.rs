use bevy::app::AppExit;
use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPlugin};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn, Level};

use crate::config::{DEFAULT_LANGUAGE, LANGUAGES};
use crate::logging::LogLine;
use crate::speaker::{Selection, SpeechCommand};
use crate::voice::devices::{list_output_devices, OutputDeviceDescriptor};

const MAX_LOG_LINES: usize = 500;

#[derive(Resource)]
pub struct SpeechChannel {
    pub tx: UnboundedSender<SpeechCommand>,
    pub logs: Mutex<UnboundedReceiver<LogLine>>,
}

/// Optional font with Hangul glyphs; egui's built-in fonts lack them.
#[derive(Resource, Default)]
pub struct UiFont(pub Option<PathBuf>);

#[derive(Resource)]
pub struct PanelState {
    pub input_text: String,
    pub log: Vec<LogLine>,
    pub devices: Vec<OutputDeviceDescriptor>,
    pub device: Option<usize>,
    pub language: String,
    pub slow: bool,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            input_text: String::new(),
            log: Vec::new(),
            devices: list_output_devices().into_iter().collect(),
            device: None,
            language: DEFAULT_LANGUAGE.to_string(),
            slow: false,
        }
    }
}

impl PanelState {
    fn selection(&self) -> Selection {
        Selection {
            device: self.device,
            language: self.language.clone(),
            slow: self.slow,
        }
    }

    fn device_label(&self) -> String {
        match self.device {
            None => "Default device".to_string(),
            Some(index) => self
                .devices
                .iter()
                .find(|d| d.index == index)
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("Device {}", index)),
        }
    }

    fn language_label(&self) -> &'static str {
        LANGUAGES
            .iter()
            .find(|(_, code)| *code == self.language)
            .map(|(label, _)| *label)
            .unwrap_or("?")
    }
}

pub struct UiPlugin;

impl Plugin for UiPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin)
            .init_resource::<PanelState>()
            .init_resource::<UiFont>()
            .add_systems(Startup, configure_egui)
            .add_systems(Update, (drain_logs, speech_panel_system).chain());
    }
}

fn configure_egui(mut contexts: EguiContexts, font: Res<UiFont>) {
    let ctx = contexts.ctx_mut();
    let mut style = (*ctx.style()).clone();

    style.visuals.window_fill = egui::Color32::from_rgb(15, 15, 18);
    style.visuals.panel_fill = egui::Color32::from_rgb(15, 15, 18);
    style.visuals.window_rounding = egui::Rounding::same(8.0);
    style.visuals.window_stroke = egui::Stroke::new(1.0, egui::Color32::from_rgb(45, 45, 55));
    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    ctx.set_style(style);

    if let Some(path) = &font.0 {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mut fonts = egui::FontDefinitions::default();
                fonts
                    .font_data
                    .insert("ui".to_owned(), egui::FontData::from_owned(bytes));
                fonts
                    .families
                    .entry(egui::FontFamily::Proportional)
                    .or_default()
                    .insert(0, "ui".to_owned());
                fonts
                    .families
                    .entry(egui::FontFamily::Monospace)
                    .or_default()
                    .push("ui".to_owned());
                ctx.set_fonts(fonts);
                info!(path = %path.display(), "UI font loaded");
            }
            Err(e) => warn!(path = %path.display(), "Failed to load UI font: {}", e),
        }
    }
}

fn drain_logs(mut state: ResMut<PanelState>, channel: Option<Res<SpeechChannel>>) {
    let Some(chan) = channel else { return };
    if let Ok(mut rx) = chan.logs.try_lock() {
        while let Ok(line) = rx.try_recv() {
            state.log.push(line);
        }
    }
    let len = state.log.len();
    if len > MAX_LOG_LINES {
        state.log.drain(..len - MAX_LOG_LINES);
    }
}

fn level_color(level: Level) -> egui::Color32 {
    if level == Level::ERROR {
        egui::Color32::from_rgb(255, 100, 100)
    } else if level == Level::WARN {
        egui::Color32::from_rgb(255, 200, 80)
    } else if level == Level::INFO {
        egui::Color32::from_rgb(200, 200, 210)
    } else {
        egui::Color32::from_rgb(120, 120, 140)
    }
}

fn speech_panel_system(
    mut contexts: EguiContexts,
    mut state: ResMut<PanelState>,
    channel: Option<Res<SpeechChannel>>,
    mut exit: EventWriter<AppExit>,
) {
    let send = |command: SpeechCommand| {
        if let Some(chan) = &channel {
            if chan.tx.send(command).is_err() {
                warn!("Speech loop is not running");
            }
        }
    };

    let ctx = contexts.ctx_mut();

    // ===== Buttons =====
    egui::TopBottomPanel::bottom("buttons").show(ctx, |ui| {
        ui.add_space(4.0);
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if ui
                .add(egui::Button::new(egui::RichText::new("Speak").strong()))
                .clicked()
            {
                send(SpeechCommand::Speak(std::mem::take(&mut state.input_text)));
            }
            if ui.button("Stop").clicked() {
                send(SpeechCommand::Stop);
            }
            if ui.button("Quit").clicked() {
                send(SpeechCommand::Shutdown);
                exit.send(AppExit);
            }
        });
        ui.add_space(4.0);
    });

    egui::CentralPanel::default().show(ctx, |ui| {
        // ===== Input =====
        ui.label(
            egui::RichText::new("Text to speak")
                .color(egui::Color32::from_rgb(180, 180, 190))
                .strong(),
        );
        let response = ui.add(
            egui::TextEdit::multiline(&mut state.input_text)
                .hint_text("Enter to speak, Shift+Enter for a new line")
                .desired_width(f32::INFINITY)
                .desired_rows(4)
                .lock_focus(true),
        );
        let enter_pressed = response.has_focus()
            && ui.input(|i| i.key_pressed(egui::Key::Enter) && !i.modifiers.shift);
        if enter_pressed {
            send(SpeechCommand::Speak(std::mem::take(&mut state.input_text)));
            response.request_focus();
        }

        ui.add_space(6.0);

        // ===== Settings =====
        egui::Frame::none()
            .fill(egui::Color32::from_rgb(25, 25, 30))
            .rounding(egui::Rounding::same(4.0))
            .inner_margin(egui::Margin::same(8.0))
            .show(ui, |ui| {
                let before = state.selection();

                ui.horizontal(|ui| {
                    ui.label("Output device:");
                    let selected = state.device_label();
                    let devices = state.devices.clone();
                    egui::ComboBox::from_id_source("device")
                        .selected_text(selected)
                        .width(360.0)
                        .show_ui(ui, |ui| {
                            ui.selectable_value(&mut state.device, None, "Default device");
                            for d in &devices {
                                ui.selectable_value(&mut state.device, Some(d.index), d.to_string());
                            }
                        });
                    if ui.small_button("⟳").on_hover_text("Refresh devices").clicked() {
                        state.devices = list_output_devices().into_iter().collect();
                    }
                });

                ui.horizontal(|ui| {
                    ui.label("Language:");
                    egui::ComboBox::from_id_source("language")
                        .selected_text(state.language_label())
                        .show_ui(ui, |ui| {
                            for (label, code) in LANGUAGES {
                                ui.selectable_value(&mut state.language, code.to_string(), *label);
                            }
                        });
                    ui.checkbox(&mut state.slow, "Slow");
                });

                let after = state.selection();
                let changed_pick = before.device != after.device || before.language != after.language;
                let apply_clicked = ui
                    .with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.button("Apply settings").clicked()
                    })
                    .inner;
                if changed_pick || apply_clicked {
                    send(SpeechCommand::Apply(after));
                }
            });

        ui.add_space(6.0);
        ui.separator();

        // ===== Log =====
        ui.label(
            egui::RichText::new("Log")
                .color(egui::Color32::from_rgb(180, 180, 190))
                .strong(),
        );
        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &state.log {
                    ui.label(
                        egui::RichText::new(&line.message)
                            .color(level_color(line.level))
                            .monospace()
                            .size(12.0),
                    );
                }
            });
    });
}
