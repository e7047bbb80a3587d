mod attachment;
mod config;
mod controller;
mod error;
mod gemini;
mod history;

use chrono::TimeZone;
use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{button, column, container, row, scrollable, text, text_input, text_input::Id, Space},
    clipboard, window, Color, Element, Length, Padding, Size, Subscription, Task, Theme,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use attachment::ImageAttachment;
use controller::{Controller, Phase, COPY_CONFIRMATION};
use error::UploadError;
use gemini::{Gateway, QueryResult};
use history::{HistoryItem, HistoryStore, MemoryStorage, SqliteStorage, Storage};

const LOADING_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ERROR_COLOR: Color = Color::from_rgb(0.94, 0.42, 0.42);
const MUTED_COLOR: Color = Color::from_rgb(0.55, 0.58, 0.68);

fn init_tracing() {
    let default_level = if std::env::var("OMNIGENIUS_DEBUG").is_ok() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> iced::Result {
    init_tracing();
    let config = config::Config::load();

    let window_settings = window::Settings {
        size: Size::new(config.window.width as f32, config.window.height as f32),
        min_size: Some(Size::new(config.window.min_width as f32, config.window.min_height as f32)),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application("OmniGenius", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings)
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    QuestionChanged(String),
    Submit,
    Answered(Result<QueryResult, String>),
    PickImage,
    ImagePicked(Option<PathBuf>),
    ImageLoaded(Result<ImageAttachment, UploadError>),
    RemoveImage,
    Clear,
    CopyAnswer,
    CopyExpired(u64),
    ShowHistory(bool),
    SelectHistory(String),
    ClearHistory,
    Tick,
    Escape,
}

struct App {
    controller: Controller,
    gateway: Gateway,
    thumbnail: Option<(String, iced::widget::image::Handle)>,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let storage: Box<dyn Storage> = match SqliteStorage::open(&config::Config::history_db_path()) {
            Ok(storage) => Box::new(storage),
            Err(e) => {
                tracing::warn!("History database unavailable ({}). History will not survive a restart.", e);
                Box::new(MemoryStorage::default())
            }
        };

        if config.gemini.resolve_api_key().is_none() {
            tracing::warn!("No API key found. Set GEMINI_API_KEY or gemini.api_key in config.toml.");
        }

        let input_id = Id::unique();
        let app = App {
            controller: Controller::new(HistoryStore::new(storage)),
            gateway: Gateway::from_config(&config.gemini),
            thumbnail: None,
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        let task = match message {
            Message::QuestionChanged(value) => {
                self.controller.set_question(value);
                Task::none()
            }
            Message::Submit => match self.controller.begin_submit() {
                Ok(query) => {
                    self.loading_frame = 0;
                    let gateway = self.gateway.clone();

                    Task::perform(
                        async move {
                            tokio::spawn(async move { gateway.ask(query).await })
                                .await
                                .map_err(|e| e.to_string())
                        },
                        Message::Answered,
                    )
                }
                Err(e) => {
                    tracing::debug!("Submit refused: {}", e);
                    Task::none()
                }
            },
            Message::Answered(outcome) => {
                self.controller.complete_submit(outcome);
                Task::none()
            }
            Message::PickImage => Task::perform(attachment::pick_image_file(), Message::ImagePicked),
            Message::ImagePicked(Some(path)) => {
                Task::perform(async move { attachment::load_image(&path).await }, Message::ImageLoaded)
            }
            Message::ImagePicked(None) => Task::none(),
            Message::ImageLoaded(outcome) => {
                self.controller.attach_image(outcome);
                Task::none()
            }
            Message::RemoveImage => {
                self.controller.remove_image();
                Task::none()
            }
            Message::Clear => {
                self.controller.clear();
                text_input::focus(self.input_id.clone())
            }
            Message::CopyAnswer => match self.controller.copy_answer() {
                Some((answer, generation)) => Task::batch([
                    clipboard::write(answer),
                    Task::perform(tokio::time::sleep(COPY_CONFIRMATION), move |_| {
                        Message::CopyExpired(generation)
                    }),
                ]),
                None => Task::none(),
            },
            Message::CopyExpired(generation) => {
                self.controller.expire_copy(generation);
                Task::none()
            }
            Message::ShowHistory(visible) => {
                self.controller.set_history_visible(visible);
                Task::none()
            }
            Message::SelectHistory(id) => {
                self.controller.select_history(&id);
                Task::none()
            }
            Message::ClearHistory => {
                self.controller.clear_history();
                Task::none()
            }
            Message::Tick => {
                if self.controller.state().loading {
                    self.loading_frame = (self.loading_frame + 1) % LOADING_FRAMES.len();
                }
                Task::none()
            }
            Message::Escape => {
                if self.controller.state().show_history {
                    self.controller.set_history_visible(false);
                    Task::none()
                } else {
                    iced::exit()
                }
            }
        };

        self.refresh_thumbnail();
        task
    }

    /// Decodes the attached image once per distinct attachment.
    fn refresh_thumbnail(&mut self) {
        let Some(image) = self.controller.state().image.as_ref() else {
            self.thumbnail = None;
            return;
        };

        let current = self.thumbnail.as_ref().map(|(source, _)| source.as_str());
        if current == Some(image.data_url()) {
            return;
        }

        self.thumbnail = image.decode().map(|bytes| {
            (
                image.data_url().to_string(),
                iced::widget::image::Handle::from_bytes(bytes),
            )
        });
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.controller.state().loading {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let keys = event::listen_with(|event, _status, _id| match event {
            IcedEvent::Keyboard(keyboard::Event::KeyPressed { key, modifiers, .. }) => match key {
                Key::Named(keyboard::key::Named::Escape) => Some(Message::Escape),
                Key::Named(keyboard::key::Named::Enter) if modifiers.command() => Some(Message::Submit),
                _ => None,
            },
            _ => None,
        });

        Subscription::batch([timer, keys])
    }

    fn view(&self) -> Element<Message> {
        let content = if self.controller.state().show_history {
            self.history_panel()
        } else {
            self.main_panel()
        };

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .padding(16)
            .into()
    }

    fn main_panel(&self) -> Element<Message> {
        let state = self.controller.state();
        let submitting = self.controller.phase() == Phase::Submitting;

        let header = row![
            column![
                text("OmniGenius").size(22),
                text("AI Online").size(11).color(MUTED_COLOR),
            ],
            Space::with_width(Length::Fill),
            button(text("[Reset]").size(14)).on_press(Message::Clear).padding(8),
            button(text("[History]").size(14)).on_press(Message::ShowHistory(true)).padding(8),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        let input = text_input("Type anything... e.g. Solve 2x + 5 = 15 or 'Summarize this photo'", &state.question)
            .on_input(Message::QuestionChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let attachment: Element<Message> = match (&state.image, &self.thumbnail) {
            (Some(image), thumbnail) => {
                let preview: Element<Message> = match thumbnail {
                    Some((_, handle)) => iced::widget::image(handle.clone()).height(120).into(),
                    None => text(image.mime_type()).size(13).into(),
                };
                row![
                    preview,
                    button(text("[Remove]").size(13)).on_press(Message::RemoveImage).padding(6),
                ]
                .spacing(12)
                .align_y(alignment::Vertical::Center)
                .into()
            }
            (None, _) => button(text("[Add Photo] OCR & Diagram Analysis").size(14))
                .on_press(Message::PickImage)
                .padding(10)
                .into(),
        };

        let ask_label = if submitting {
            format!("{} Thinking...", LOADING_FRAMES[self.loading_frame % LOADING_FRAMES.len()])
        } else {
            "Ask AI".to_string()
        };
        let ask = button(text(ask_label).size(16))
            .on_press_maybe((!submitting).then_some(Message::Submit))
            .padding(12);

        let mut body = column![
            header,
            text("YOUR QUESTION").size(12).color(MUTED_COLOR),
            input,
            text("Tip: press Ctrl+Enter to send").size(11).color(MUTED_COLOR),
            text("ATTACH IMAGE (OPTIONAL)").size(12).color(MUTED_COLOR),
            attachment,
            ask,
        ]
        .spacing(10);

        if let Some(error) = &state.error {
            body = body.push(text(error.clone()).size(14).color(ERROR_COLOR));
        }

        if !state.answer.is_empty() {
            let copy_label = if state.copied { "Copied!" } else { "[Copy]" };
            let answer_card = column![
                row![
                    text("ANSWER").size(12).color(MUTED_COLOR),
                    Space::with_width(Length::Fill),
                    button(text(copy_label).size(14)).on_press(Message::CopyAnswer).padding(8),
                ]
                .align_y(alignment::Vertical::Center),
                text(state.answer.clone()).size(15),
            ]
            .spacing(8);

            body = body.push(container(answer_card).padding(Padding::from([10, 0])));
        }

        scrollable(body.padding(Padding::from([0, 12]))).height(Length::Fill).into()
    }

    fn history_panel(&self) -> Element<Message> {
        let history = self.controller.history();

        let header = row![
            text("History").size(20),
            Space::with_width(Length::Fill),
            button(text("[Clear history]").size(13))
                .on_press_maybe((!history.is_empty()).then_some(Message::ClearHistory))
                .padding(8),
            button(text("[Close]").size(13)).on_press(Message::ShowHistory(false)).padding(8),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        let list: Element<Message> = if history.is_empty() {
            container(text("No history yet. Ask something!").color(MUTED_COLOR))
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(alignment::Horizontal::Center)
                .align_y(alignment::Vertical::Center)
                .into()
        } else {
            let entries = history.iter().fold(column![].spacing(6), |list, item| list.push(history_row(item)));
            scrollable(entries).height(Length::Fill).into()
        };

        column![header, list].spacing(12).into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

fn history_row(item: &HistoryItem) -> Element<'static, Message> {
    let date = chrono::Local
        .timestamp_millis_opt(item.timestamp)
        .single()
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    button(
        column![
            row![
                text(item.kind.as_str().to_uppercase()).size(11).color(MUTED_COLOR),
                Space::with_width(Length::Fill),
                text(date).size(11).color(MUTED_COLOR),
            ],
            text(item.question.clone()).size(14),
        ]
        .spacing(4),
    )
    .width(Length::Fill)
    .padding(10)
    .on_press(Message::SelectHistory(item.id.clone()))
    .into()
}
