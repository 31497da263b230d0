//! Interactive prompt loop.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use charla_app::{Attachment, ChatApp, Role, StateEvent};

pub async fn run(app: Arc<ChatApp>, model: String) -> anyhow::Result<()> {
    println!("Escribe un mensaje, o /ayuda para ver los comandos.");
    let mut attachments: Vec<Attachment> = vec![];
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let name = parts.next().unwrap_or_default();
            let argument = parts.next().unwrap_or_default().trim();
            match name {
                "salir" => return Ok(()),
                "ayuda" => print_help(),
                "nuevo" => {
                    app.new_conversation();
                    println!("Nuevo chat creado.");
                }
                "lista" => {
                    let active = app.store().active_id();
                    for (index, conversation) in app.store().all().iter().enumerate() {
                        let marker = if active.as_deref() == Some(&conversation.id) {
                            "*"
                        } else {
                            " "
                        };
                        println!("{marker} {index}. {}", conversation.title);
                    }
                }
                "cambiar" => match argument.parse::<usize>() {
                    Ok(index) => {
                        let conversations = app.store().all();
                        match conversations.get(index) {
                            Some(conversation) => {
                                app.select_conversation(&conversation.id)?;
                                println!("Cambiado a: {}", conversation.title);
                            }
                            None => println!("No existe la conversación {index}."),
                        }
                    }
                    Err(_) => println!("Uso: /cambiar N"),
                },
                "borrar" => {
                    if let Some(id) = app.store().active_id() {
                        app.delete_conversation(&id)?;
                        println!("Conversación borrada.");
                    }
                }
                "adjuntar" => match load_attachment(argument) {
                    Ok(attachment) => {
                        println!("Adjuntado: {argument}");
                        attachments.push(attachment);
                    }
                    Err(e) => println!("No se pudo adjuntar: {e:#}"),
                },
                _ => println!("Comando desconocido: /{name}"),
            }
            continue;
        }

        let pending = std::mem::take(&mut attachments);
        send_and_print(&app, &model, line, pending).await?;
    }
}

/// Run one send, echoing the answer as it streams in.
async fn send_and_print(
    app: &Arc<ChatApp>,
    model: &str,
    prompt: &str,
    attachments: Vec<Attachment>,
) -> anyhow::Result<()> {
    let mut events = app.subscribe();
    let send = {
        let app = Arc::clone(app);
        let model = model.to_string();
        let prompt = prompt.to_string();
        tokio::spawn(async move { app.send(&model, &prompt, attachments).await })
    };

    let mut printed = String::new();
    loop {
        match events.recv().await {
            Ok(StateEvent::Updated { conversation_id }) => {
                let Some(conversation) = app.store().get(&conversation_id) else {
                    continue;
                };
                let Some(last) = conversation.messages.last() else {
                    continue;
                };
                if last.role != Role::Assistant {
                    continue;
                }
                if let Some(suffix) = last.content.strip_prefix(&printed) {
                    print!("{suffix}");
                } else {
                    // Content was replaced, not extended (an error message).
                    print!("\n{}", last.content);
                }
                std::io::stdout().flush()?;
                printed = last.content.clone();
            }
            Ok(StateEvent::GenerationEnded { .. }) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    println!();

    if let Err(e) = send.await? {
        println!("Error: {e}");
    }

    if app.settings().show_reasoning {
        print_reasoning(app);
    }
    Ok(())
}

/// Show the reasoning block of the latest reply, when there is one.
fn print_reasoning(app: &Arc<ChatApp>) {
    let Some(id) = app.store().active_id() else {
        return;
    };
    let Some(conversation) = app.store().get(&id) else {
        return;
    };
    let count = conversation.messages.len();
    if count >= 2 && conversation.messages[count - 2].role == Role::Reasoning {
        println!("--- razonamiento ---");
        println!("{}", conversation.messages[count - 2].content);
        println!("--------------------");
    }
}

/// Read a file from disk as an attachment: known image extensions become
/// base64 data URIs, everything else is inlined as text.
fn load_attachment(path: &str) -> anyhow::Result<Attachment> {
    if path.is_empty() {
        anyhow::bail!("uso: /adjuntar ruta");
    }
    let path = Path::new(path);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archivo")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let mime = match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    };
    match mime {
        Some(mime) => {
            let bytes = std::fs::read(path).with_context(|| format!("leyendo {name}"))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Ok(Attachment::image(name, format!("data:{mime};base64,{encoded}")))
        }
        None => {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("leyendo {name}"))?;
            Ok(Attachment::file(name, content))
        }
    }
}

fn print_help() {
    println!("/nuevo           empieza una conversación nueva");
    println!("/lista           lista las conversaciones");
    println!("/cambiar N       cambia a la conversación N");
    println!("/borrar          borra la conversación actual");
    println!("/adjuntar ruta   adjunta un archivo al próximo mensaje");
    println!("/ayuda           muestra esta ayuda");
    println!("/salir           termina");
}
