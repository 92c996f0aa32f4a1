//! Dioxus desktop UI for the live classroom.
//!
//! Two screens: a join screen (room input, disabled while a join is in
//! flight) and the active session view with the whiteboard surface, the
//! presenter's own tile, and ten student tiles with waiting placeholders.

use dioxus::prelude::*;
use dioxus_desktop::tao::event::{Event as WryEvent, WindowEvent};
use dioxus_desktop::use_wry_event_handler;
use live_classroom::backend::ClassroomTransport;
use live_classroom::classroom::Classroom;
use live_classroom::config::{Config, SEAT_CAPACITY};
use live_classroom::media::{CpalMediaDevices, MediaDevices};
use live_classroom::moderation::Role;
use live_classroom::roster::{ParticipantTile, RosterSnapshot};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    dioxus_desktop::launch_with_props(App, AppProps { config }, dioxus_desktop::Config::default());
}

#[derive(Props, PartialEq)]
struct AppProps {
    config: Config,
}

fn App(cx: Scope<AppProps>) -> Element {
    let room_input = use_state(cx, || cx.props.config.default_room.clone());
    let is_joining = use_state(cx, || false);
    let in_session = use_state(cx, || false);
    let error_message = use_state(cx, String::new);
    let snapshot = use_state(cx, RosterSnapshot::default);
    let mic_on = use_state(cx, || true);
    let camera_on = use_state(cx, || true);

    let can_moderate = cx.props.config.role == Role::Presenter;
    let local_label = match cx.props.config.role {
        Role::Presenter => "You (Teacher)",
        Role::Student => "You (Student)",
    };

    // One classroom per app, with long-lived watchers feeding the UI state.
    let (classroom, leave, close_tx) = cx
        .use_hook(|| {
            let transport = Arc::new(ClassroomTransport::new(cx.props.config.clone()));
            let devices: Arc<dyn MediaDevices> = Arc::new(CpalMediaDevices);
            let classroom = Classroom::new(transport, devices, cx.props.config.role);
            let leave = classroom.leave_handle();
            let mut roster_rx = classroom.roster();
            let mut lost_rx = classroom.connection_lost();
            let classroom = Arc::new(Mutex::new(classroom));
            let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

            // The watch channel starts seeded with the empty roster; show it
            // right away so the rail renders every placeholder tile.
            snapshot.set(roster_rx.borrow().clone());

            let watcher_classroom = classroom.clone();
            let snapshot = snapshot.clone();
            let in_session = in_session.clone();
            let error_message = error_message.clone();
            cx.spawn(async move {
                loop {
                    tokio::select! {
                        changed = roster_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            snapshot.set(roster_rx.borrow().clone());
                        }
                        changed = lost_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if *lost_rx.borrow() {
                                watcher_classroom.lock().await.end().await;
                                error_message.set(
                                    "Connection to the class was lost. Please join again."
                                        .to_string(),
                                );
                                in_session.set(false);
                            }
                        }
                        closed = close_rx.recv() => {
                            if closed.is_none() {
                                break;
                            }
                            watcher_classroom.lock().await.end().await;
                            in_session.set(false);
                        }
                    }
                }
            });

            (classroom, leave, close_tx)
        })
        .clone();

    // Closing the window ends the session: a leave that races an in-flight
    // join is flagged immediately, and the teardown runs on the watcher task.
    {
        let leave = leave.clone();
        let close_tx = close_tx.clone();
        use_wry_event_handler(cx, move |event, _| {
            if let WryEvent::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } = event
            {
                leave.request();
                let _ = close_tx.try_send(());
            }
        });
    }

    let on_join = {
        let classroom = classroom.clone();
        move |_| {
            if *is_joining.get() || *in_session.get() {
                return;
            }
            let classroom = classroom.clone();
            let room = room_input.get().clone();
            let is_joining = is_joining.clone();
            let in_session = in_session.clone();
            let error_message = error_message.clone();
            let mic_on = mic_on.clone();
            let camera_on = camera_on.clone();
            cx.spawn(async move {
                is_joining.set(true);
                error_message.set(String::new());
                let mut classroom = classroom.lock().await;
                match classroom.start(&room).await {
                    Ok(()) => {
                        if classroom.is_active() {
                            mic_on.set(true);
                            camera_on.set(true);
                            in_session.set(true);
                        }
                    }
                    Err(e) => error_message.set(e.user_message()),
                }
                is_joining.set(false);
            });
        }
    };

    let on_leave = {
        let classroom = classroom.clone();
        move |_| {
            let classroom = classroom.clone();
            let in_session = in_session.clone();
            cx.spawn(async move {
                classroom.lock().await.end().await;
                in_session.set(false);
            });
        }
    };

    let on_toggle_mic = {
        let classroom = classroom.clone();
        move |_| {
            let classroom = classroom.clone();
            let mic_on = mic_on.clone();
            cx.spawn(async move {
                let next = !*mic_on.get();
                if classroom.lock().await.set_mic_enabled(next).is_ok() {
                    mic_on.set(next);
                }
            });
        }
    };

    let on_toggle_camera = {
        let classroom = classroom.clone();
        move |_| {
            let classroom = classroom.clone();
            let camera_on = camera_on.clone();
            cx.spawn(async move {
                let next = !*camera_on.get();
                if classroom.lock().await.set_camera_enabled(next).is_ok() {
                    camera_on.set(next);
                }
            });
        }
    };

    if !*in_session.get() {
        let join_label = if *is_joining.get() {
            "Joining..."
        } else {
            "Join Class"
        };
        return cx.render(rsx! {
            style { include_str!("./style.css") }
            div { class: "join-screen",
                h1 { "Live Classroom" }
                div { class: "control-panel",
                    label { r#for: "room", "Room:" }
                    input {
                        id: "room",
                        value: "{room_input.get()}",
                        disabled: "{*is_joining.get()}",
                        oninput: move |e| room_input.set(e.value.clone()),
                    }
                    button {
                        onclick: on_join,
                        disabled: "{*is_joining.get()}",
                        "{join_label}"
                    }
                }
                {(!error_message.get().is_empty()).then(|| rsx!(
                    div { class: "error-message", "{error_message.get()}" }
                ))}
            }
        });
    }

    let roster = snapshot.get();
    let occupancy = format!("{} / {} online", roster.participant_count + 1, SEAT_CAPACITY);
    let mic_label = if *mic_on.get() { "Mute Mic" } else { "Unmute Mic" };
    let camera_label = if *camera_on.get() {
        "Stop Camera"
    } else {
        "Start Camera"
    };
    let local_frame_class = if *camera_on.get() {
        "video-frame"
    } else {
        "video-frame video-off"
    };

    cx.render(rsx! {
        style { include_str!("./style.css") }
        div { class: "classroom",
            div { class: "top-bar",
                span { class: "occupancy", "{occupancy}" }
                {(roster.deferred_count > 0).then(|| rsx!(
                    span { class: "deferred-note", "{roster.deferred_count} waiting for a tile" }
                ))}
                div { class: "session-controls",
                    button { onclick: on_toggle_mic, "{mic_label}" }
                    button { onclick: on_toggle_camera, "{camera_label}" }
                    button { class: "end-button", onclick: on_leave, "End Class" }
                }
            }
            {(!error_message.get().is_empty()).then(|| rsx!(
                div { class: "error-message", "{error_message.get()}" }
            ))}
            div { class: "main-area",
                CanvasCollaborator { room: room_input.get().clone() }
                div { class: "participant-rail",
                    div { class: "tile local-tile",
                        div { class: "{local_frame_class}",
                            {(!*camera_on.get()).then(|| rsx!(
                                span { class: "camera-off-label", "Camera off" }
                            ))}
                        }
                        div { class: "tile-footer",
                            span { class: "tile-label", "{local_label}" }
                        }
                    }
                    {roster.tiles.iter().enumerate().map(|(i, slot)| match slot {
                        Some(tile) => {
                            let classroom = classroom.clone();
                            let id = tile.id.clone();
                            let muted = tile.muted_by_moderator;
                            rsx!(StudentTile {
                                key: "{tile.id}",
                                tile: tile.clone(),
                                can_moderate: can_moderate,
                                on_toggle_mute: move |_| {
                                    let classroom = classroom.clone();
                                    let id = id.clone();
                                    cx.spawn(async move {
                                        let classroom = classroom.lock().await;
                                        if muted {
                                            classroom.unmute_student(&id);
                                        } else {
                                            classroom.mute_student(&id);
                                        }
                                    });
                                }
                            })
                        }
                        None => rsx!(div {
                            key: "empty-{i}",
                            class: "tile placeholder-tile",
                            span { "Waiting for student..." }
                        }),
                    })}
                }
            }
        }
    })
}

/// The shared drawing surface. Mounted while the session is active and torn
/// down with it; the classroom core has no data coupling to it.
#[derive(Props, PartialEq)]
struct CanvasCollaboratorProps {
    room: String,
}

fn CanvasCollaborator(cx: Scope<CanvasCollaboratorProps>) -> Element {
    cx.render(rsx! {
        div { class: "whiteboard",
            div { class: "whiteboard-header", "Whiteboard: {cx.props.room}" }
            div { class: "whiteboard-canvas" }
        }
    })
}

#[derive(Props)]
struct StudentTileProps<'a> {
    tile: ParticipantTile,
    can_moderate: bool,
    on_toggle_mute: EventHandler<'a, ()>,
}

fn StudentTile<'a>(cx: Scope<'a, StudentTileProps<'a>>) -> Element {
    let tile = &cx.props.tile;
    let frame_class = if tile.has_video {
        "video-frame"
    } else {
        "video-frame video-off"
    };
    let label = format!("Student {}", short_id(&tile.id));
    let mute_label = if tile.muted_by_moderator {
        "Unmute"
    } else {
        "Mute"
    };

    cx.render(rsx! {
        div { class: "tile student-tile",
            div { class: "{frame_class}",
                {(!tile.has_video).then(|| rsx!(
                    span { class: "camera-off-label", "Camera off" }
                ))}
            }
            div { class: "tile-footer",
                span { class: "tile-label", "{label}" }
                {tile.muted_by_moderator.then(|| rsx!(
                    span { class: "muted-badge", "Muted" }
                ))}
                {(cx.props.can_moderate && tile.has_audio).then(|| rsx!(
                    button {
                        class: "mute-button",
                        onclick: move |_| cx.props.on_toggle_mute.call(()),
                        "{mute_label}"
                    }
                ))}
            }
        }
    })
}

/// Shorten an opaque peer id for display on a tile.
fn short_id(id: &str) -> &str {
    let trimmed = id.strip_prefix("user-").unwrap_or(id);
    let end = trimmed
        .char_indices()
        .nth(6)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}
