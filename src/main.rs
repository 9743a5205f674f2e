mod config;
mod controller;
mod diagnostics;
mod dialogs;
mod history;
mod markdown;
mod session;
mod transcript;
mod worker;

use iced::{
    widget::{
        button, column, container, markdown as md, row, scrollable, text, text_input,
        text_input::Id, Column,
    },
    Color, Element, Length, Task, Theme, Subscription, Size,
    time, clipboard,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment,
    window,
};
use iced::widget::image::Handle as ImageHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::controller::{Controller, Outcome};
use crate::diagnostics::Kind;
use crate::history::{user_label_rgb, ChatMessage, Sender};
use crate::session::{ImageSlot, Session, SubmitError};
use crate::worker::ProcessWorker;

const TITLE: &str = "Where do you want to go?";
const DIAGNOSTIC_LINES: usize = 10;

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("landmark_chat=info")),
        )
        .init();

    let config = Config::load();
    let window_settings = window::Settings {
        size: Size::new(config.window.width as f32, config.window.height as f32),
        min_size: Some(Size::new(
            config.window.min_width as f32,
            config.window.min_height as f32,
        )),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application(TITLE, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings)
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    PickImage,
    ImagePicked(Result<Option<PathBuf>, String>),
    ClearImage,
    WorkerFinished(Outcome),
    GeneratedImageLoaded(u64, Result<Vec<u8>, String>),
    Export,
    Exported(Result<Option<PathBuf>, String>),
    LinkClicked(md::Url),
    ToggleDiagnostics,
    Tick,
    CopyLastReply,
    Exit,
}

struct App {
    controller: Controller,
    input_text: String,
    selected_image: Option<PathBuf>,
    // Parsed markdown for each log entry, same order as the log.
    rendered: Vec<Vec<md::Item>>,
    panel_image: Option<(u64, ImageHandle)>,
    show_diagnostics: bool,
    loading_frame: usize,
    input_id: Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: Config) -> (Self, Task<Message>) {
        diagnostics::record(
            Kind::Info,
            format!(
                "Ready. Text worker `{}`, image worker `{}`",
                config.worker.text.program, config.worker.image.program
            ),
        );
        let worker = Arc::new(ProcessWorker::new(config.worker));
        let session = Session::new(config.conversation);
        let input_id = Id::unique();

        let app = App {
            controller: Controller::new(session, worker),
            input_text: String::new(),
            selected_image: None,
            rendered: Vec::new(),
            panel_image: None,
            show_diagnostics: false,
            loading_frame: 0,
            input_id: input_id.clone(),
            scroll_id: scrollable::Id::unique(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let image = self.selected_image.clone();
                match self.controller.submit(&self.input_text, image.as_deref()) {
                    Ok(pending) => {
                        self.input_text.clear();
                        self.selected_image = None;
                        self.loading_frame = 0;
                        self.sync_rendered();
                        Task::batch([
                            Task::perform(pending, Message::WorkerFinished),
                            self.scroll_to_end(),
                        ])
                    }
                    Err(SubmitError::Empty) => {
                        self.sync_rendered();
                        self.scroll_to_end()
                    }
                    Err(SubmitError::Busy) => Task::none(),
                }
            }
            Message::WorkerFinished(outcome) => {
                let changed = self.controller.deliver(outcome);
                self.sync_rendered();

                let load = match changed {
                    Some(ImageSlot { path, revision }) => {
                        self.panel_image = None;
                        Task::perform(load_image(path), move |bytes| {
                            Message::GeneratedImageLoaded(revision, bytes)
                        })
                    }
                    None => Task::none(),
                };

                Task::batch([
                    load,
                    self.scroll_to_end(),
                    text_input::focus(self.input_id.clone()),
                ])
            }
            Message::GeneratedImageLoaded(revision, bytes) => {
                let current = self
                    .controller
                    .session()
                    .generated_image()
                    .map(|slot| slot.revision);
                if current != Some(revision) {
                    return Task::none();
                }
                match bytes {
                    Ok(bytes) => self.panel_image = Some((revision, ImageHandle::from_bytes(bytes))),
                    Err(e) => diagnostics::record(Kind::Error, e),
                }
                Task::none()
            }
            Message::PickImage => Task::perform(dialogs::pick_image(), Message::ImagePicked),
            Message::ImagePicked(result) => {
                // The dialog is not modal; a submit may have started meanwhile.
                if !self.controller.session().input_enabled() {
                    tracing::debug!("image picked while awaiting response, ignoring it");
                    return Task::none();
                }
                match result {
                    Ok(Some(path)) => self.selected_image = Some(path),
                    Ok(None) => {}
                    Err(e) => diagnostics::record(Kind::Error, e),
                }
                Task::none()
            }
            Message::ClearImage => {
                self.selected_image = None;
                Task::none()
            }
            Message::Export => {
                let document = transcript::export(self.controller.session().log());
                tracing::debug!(
                    bytes = document.len(),
                    content_type = transcript::CONTENT_TYPE,
                    "exporting transcript"
                );
                Task::perform(dialogs::save_transcript(document), Message::Exported)
            }
            Message::Exported(result) => {
                match result {
                    Ok(Some(path)) => diagnostics::record(
                        Kind::Export,
                        format!("Transcript saved to {}", path.display()),
                    ),
                    Ok(None) => {}
                    Err(e) => diagnostics::record(Kind::Error, e),
                }
                Task::none()
            }
            Message::LinkClicked(url) => {
                tracing::debug!(%url, "link clicked");
                Task::none()
            }
            Message::ToggleDiagnostics => {
                self.show_diagnostics = !self.show_diagnostics;
                Task::none()
            }
            Message::Tick => {
                if !self.controller.session().input_enabled() {
                    self.loading_frame = (self.loading_frame + 1) % 80; // 10 frames * 8 messages
                }
                Task::none()
            }
            Message::CopyLastReply => {
                match self.controller.session().log().last_from(Sender::System) {
                    Some(reply) => clipboard::write(reply.content().to_string()),
                    None => Task::none(),
                }
            }
            Message::Exit => iced::exit(),
        }
    }

    fn sync_rendered(&mut self) {
        let log = self.controller.session().log();
        let start = self.rendered.len();
        self.rendered.extend(
            log.iter()
                .skip(start)
                .map(|m| md::parse(m.content()).collect::<Vec<_>>()),
        );
    }

    fn scroll_to_end(&self) -> Task<Message> {
        scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.controller.session().input_enabled() {
            Subscription::none()
        } else {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let session = self.controller.session();
        let enabled = session.input_enabled();

        let entries = session
            .log()
            .iter()
            .zip(&self.rendered)
            .fold(Column::new().spacing(10), |col, (message, items)| {
                col.push(self.view_message(message, items))
            });
        let conversation = scrollable(container(entries).padding(10).width(Length::Fill))
            .id(self.scroll_id.clone())
            .height(Length::Fill);

        let mut input = text_input("Describe where you want to go...", &self.input_text)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if enabled {
            input = input
                .on_input(Message::InputChanged)
                .on_submit(Message::Submit);
        }

        let image_label = self
            .selected_image
            .as_deref()
            .map(file_label)
            .unwrap_or_else(|| "Image...".to_string());
        let mut controls = row![
            input,
            button(text(image_label).size(14))
                .on_press_maybe(enabled.then_some(Message::PickImage))
                .padding(10),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);
        if enabled && self.selected_image.is_some() {
            controls = controls.push(button(text("x").size(14)).on_press(Message::ClearImage).padding(10));
        }
        controls = controls.push(
            button(text("Send").size(14))
                .on_press_maybe(enabled.then_some(Message::Submit))
                .padding(10),
        );

        let actions = row![
            self.view_status(),
            button(text("[Copy]").size(14)).on_press(Message::CopyLastReply).padding(8),
            button(text("[Export]").size(14)).on_press(Message::Export).padding(8),
            button(text("[Log]").size(14)).on_press(Message::ToggleDiagnostics).padding(8),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        let mut chat = column![conversation, controls, actions]
            .spacing(10)
            .padding(10)
            .width(Length::FillPortion(2));
        if self.show_diagnostics {
            chat = chat.push(self.view_diagnostics());
        }

        let mut layout = row![chat].spacing(10);
        if session.settings().image_panel {
            layout = layout.push(self.view_image_panel());
        }

        container(layout)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn view_message<'a>(&'a self, message: &'a ChatMessage, items: &'a [md::Item]) -> Element<'a, Message> {
        let body: Element<'a, Message> = md::view(
            items,
            md::Settings::default(),
            md::Style::from_palette(self.theme().palette()),
        )
        .map(Message::LinkClicked);

        let mut content = column![body].spacing(8);
        if let Some(path) = message.attached_image() {
            // Generated images go to the side panel when it is enabled.
            let inline = message.sender() == Sender::User
                || !self.controller.session().settings().image_panel;
            if inline {
                content = content.push(
                    iced::widget::image(ImageHandle::from_path(path)).width(Length::Fixed(240.0)),
                );
            }
        }

        let bubble = container(content).padding(12).width(Length::Fill);
        match message.sender() {
            Sender::User => bubble.style(user_bubble),
            Sender::System => bubble.style(container::bordered_box),
        }
        .into()
    }

    fn view_status(&self) -> Element<Message> {
        let status = if !self.controller.session().input_enabled() {
            let loading_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
            let loading_messages = [
                "Looking for landmarks...",
                "Asking the worker nicely...",
                "Reading travel guides...",
                "Drawing the map...",
                "Thinking really hard...",
                "Checking the sights...",
                "Comparing descriptions...",
                "Packing the answer...",
            ];
            let message_idx = (self.loading_frame / 10) % loading_messages.len();
            let spinner_idx = self.loading_frame % loading_frames.len();
            format!("{} {}", loading_frames[spinner_idx], loading_messages[message_idx])
        } else {
            diagnostics::latest().map(|entry| entry.text).unwrap_or_default()
        };

        container(text(status).size(13))
            .width(Length::Fill)
            .into()
    }

    fn view_diagnostics(&self) -> Element<Message> {
        let lines = diagnostics::recent(DIAGNOSTIC_LINES)
            .into_iter()
            .fold(Column::new().spacing(2), |col, entry| {
                col.push(text(format!("[{:?}] {}", entry.kind, entry.text)).size(12))
            });
        container(scrollable(lines).height(Length::Fixed(120.0)))
            .padding(8)
            .width(Length::Fill)
            .style(container::dark)
            .into()
    }

    fn view_image_panel(&self) -> Element<Message> {
        let body: Element<Message> = match &self.panel_image {
            Some((_, handle)) => iced::widget::image(handle.clone()).width(Length::Fill).into(),
            None => text("No generated image yet").size(14).into(),
        };

        container(column![text("Generated image").size(16), body].spacing(10))
            .padding(10)
            .width(Length::FillPortion(1))
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

/// User messages carry the same label colour as the exported transcript.
fn user_bubble(theme: &Theme) -> container::Style {
    let [r, g, b] = user_label_rgb();
    container::Style {
        text_color: Some(Color::from_rgb8(r, g, b)),
        ..container::rounded_box(theme)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn load_image(path: PathBuf) -> Result<Vec<u8>, String> {
    tokio::fs::read(&path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}
