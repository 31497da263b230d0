//! Request orchestration: the send lifecycle from prompt to projected reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use charla_gateway::wire::{ApiMessage, ChatRequest, ContentPart};
use charla_gateway::{DeltaAccumulator, StreamEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::events::StateEvent;
use crate::message::{Attachment, Conversation, Message, NEW_CHAT_TITLE, Role, derive_title};
use crate::projector::Projector;
use crate::settings::Settings;
use crate::storage::Storage;
use crate::store::ConversationStore;
use crate::transport::Gateway;

/// The application core: owns the conversation store, the settings, and the
/// single in-flight send.
///
/// Only one generation runs at a time; a second `send` while one is in
/// flight fails with [`Error::Busy`]. Gateway and stream failures during a
/// send do not fail the call: they are written into the pending assistant
/// message, the way the user sees them.
pub struct ChatApp {
    gateway: Arc<dyn Gateway>,
    store: ConversationStore,
    storage: Storage,
    settings: Mutex<Settings>,
    logged_in: AtomicBool,
    generating: AtomicBool,
    event_tx: broadcast::Sender<StateEvent>,
}

impl ChatApp {
    /// Create the app, loading persisted history and settings. An empty
    /// history starts with one fresh conversation.
    pub fn new(gateway: Arc<dyn Gateway>, storage: Storage) -> Result<Self> {
        let store = ConversationStore::new();
        store.load(storage.load_history()?);
        if store.is_empty() {
            store.insert(Conversation::new());
        }
        let settings = storage.load_settings()?;
        let (event_tx, _) = broadcast::channel(256);
        Ok(Self {
            gateway,
            store,
            storage,
            settings: Mutex::new(settings),
            logged_in: AtomicBool::new(false),
            generating: AtomicBool::new(false),
            event_tx,
        })
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Replace the settings, persisting them.
    pub fn set_settings(&self, settings: Settings) -> Result<()> {
        self.storage.save_settings(&settings)?;
        *self.settings.lock() = settings;
        self.emit(StateEvent::SettingsChanged);
        Ok(())
    }

    /// Check a password against the gateway.
    pub async fn login(&self, password: &str) -> Result<bool> {
        let ok = self.gateway.login(password).await?;
        self.logged_in.store(ok, Ordering::SeqCst);
        Ok(ok)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    /// Model ids the gateway currently serves.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.gateway.list_models().await?)
    }

    /// Whether a send is currently in flight.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    /// Start a fresh conversation and make it active.
    pub fn new_conversation(&self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.store.insert(conversation);
        self.emit(StateEvent::Updated {
            conversation_id: id.clone(),
        });
        self.persist_history();
        id
    }

    /// Delete a conversation. Any in-flight send against it keeps draining
    /// its stream but its writes land nowhere.
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        if !self.store.remove(id) {
            return Err(Error::ConversationNotFound(id.to_string()));
        }
        self.emit(StateEvent::Updated {
            conversation_id: id.to_string(),
        });
        self.persist_history();
        Ok(())
    }

    /// Make a conversation active.
    pub fn select_conversation(&self, id: &str) -> Result<()> {
        if !self.store.select(id) {
            return Err(Error::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Send a prompt (plus attachments) to the active conversation and apply
    /// the model's reply as it arrives.
    pub async fn send(
        &self,
        model: &str,
        prompt: &str,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        if prompt.trim().is_empty() && attachments.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        if self.generating.swap(true, Ordering::SeqCst) {
            return Err(Error::Busy);
        }
        let result = self.run_send(model, prompt, attachments).await;
        self.generating.store(false, Ordering::SeqCst);
        self.persist_history();
        // Tagged with the id the send actually ran against, which may no
        // longer be the active conversation.
        if let Ok(id) = &result {
            self.emit(StateEvent::GenerationEnded {
                conversation_id: id.clone(),
            });
        }
        result.map(|_| ())
    }

    /// Returns the id of the conversation the send ran against.
    async fn run_send(
        &self,
        model: &str,
        prompt: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String> {
        let id = match self.store.active_id() {
            Some(id) => id,
            None => self.new_conversation(),
        };
        let conversation = self
            .store
            .get(&id)
            .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;
        let settings = self.settings();

        let mut messages = conversation.messages;
        if messages.is_empty() && !settings.system_prompt.is_empty() {
            messages.push(Message::system(settings.system_prompt.clone()));
        }
        messages.push(build_user_message(prompt, &attachments));

        let title = if conversation.title == NEW_CHAT_TITLE {
            derive_title(prompt)
        } else {
            conversation.title
        };

        let op = self
            .store
            .begin_send(&id, messages.clone(), title)
            .ok_or_else(|| Error::ConversationNotFound(id.clone()))?;
        self.emit(StateEvent::GenerationStarted {
            conversation_id: id.clone(),
        });
        self.emit(StateEvent::Updated {
            conversation_id: id.clone(),
        });

        let request = build_request(model, &messages, &settings);

        messages.push(Message::assistant(""));
        if !self.store.replace_messages(&id, op, messages.clone()) {
            return Ok(id);
        }
        self.emit(StateEvent::Updated {
            conversation_id: id.clone(),
        });

        if settings.streaming {
            match self.gateway.chat_stream(&request).await {
                Ok(stream) => self.drive_stream(&id, op, messages, stream).await,
                Err(e) => self.fail(&id, op, messages, &e),
            }
        } else {
            match self.gateway.chat(&request).await {
                // The full body is taken verbatim in one atomic update; no
                // sentinel splitting, no reasoning message.
                Ok(text) => {
                    if let Some(last) = messages.last_mut() {
                        last.content = text;
                    }
                    if self.store.replace_messages(&id, op, messages) {
                        self.emit(StateEvent::Updated {
                            conversation_id: id.clone(),
                        });
                    }
                }
                Err(e) => self.fail(&id, op, messages, &e),
            }
        }
        Ok(id)
    }

    /// Drain a response stream, projecting each delta onto the conversation
    /// tail. A rejected write means the send was superseded or the
    /// conversation deleted; the stream is simply dropped.
    async fn drive_stream(
        &self,
        id: &str,
        op: u64,
        mut messages: Vec<Message>,
        mut stream: charla_gateway::StreamEventStream,
    ) {
        let mut accumulator = DeltaAccumulator::new();
        let mut projector = Projector::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(delta) => {
                    let split = accumulator.push(&delta);
                    projector.project(&mut messages, &split);
                    if !self.store.replace_messages(id, op, messages.clone()) {
                        return;
                    }
                    self.emit(StateEvent::Updated {
                        conversation_id: id.to_string(),
                    });
                }
                StreamEvent::Error { message, details } => {
                    let text = match details {
                        Some(details) => format!("Error: {message}. {details}"),
                        None => format!("Error: {message}."),
                    };
                    if let Some(last) = messages.last_mut() {
                        last.content = text;
                    }
                    if self.store.replace_messages(id, op, messages) {
                        self.emit(StateEvent::Updated {
                            conversation_id: id.to_string(),
                        });
                    }
                    return;
                }
                StreamEvent::Done => return,
            }
        }
    }

    /// Replace the pending assistant message with the error the user should
    /// see.
    fn fail(&self, id: &str, op: u64, mut messages: Vec<Message>, e: &charla_gateway::Error) {
        tracing::warn!(conversation = id, error = %e, "send failed");
        if let Some(last) = messages.last_mut() {
            last.content = e.user_message();
        }
        if self.store.replace_messages(id, op, messages) {
            self.emit(StateEvent::Updated {
                conversation_id: id.to_string(),
            });
        }
    }

    fn persist_history(&self) {
        if let Err(e) = self.storage.save_history(&self.store.all()) {
            tracing::warn!(error = %e, "failed to persist history");
        }
    }

    fn emit(&self, event: StateEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Build the user message for a send: text attachments are inlined below the
/// prompt, images ride alongside as data URIs.
fn build_user_message(prompt: &str, attachments: &[Attachment]) -> Message {
    let mut content = prompt.to_string();
    let mut images = vec![];
    for attachment in attachments {
        match attachment {
            Attachment::File { name, content: file } => {
                content.push_str(&format!("\n\n[Archivo: {name}]\n{file}"));
            }
            Attachment::Image { data_uri, .. } => images.push(data_uri.clone()),
        }
    }
    Message::user(content, images)
}

/// Build the wire request from the conversation context. Reasoning messages
/// never go back to the model; a user message with images becomes multipart.
fn build_request(model: &str, messages: &[Message], settings: &Settings) -> ChatRequest {
    let api_messages = messages
        .iter()
        .filter(|m| m.role != Role::Reasoning)
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Reasoning => unreachable!(),
            };
            if m.images.is_empty() {
                ApiMessage::text(role, m.content.clone())
            } else {
                let mut parts = vec![ContentPart::text(m.content.clone())];
                parts.extend(m.images.iter().map(ContentPart::image));
                ApiMessage::parts(role, parts)
            }
        })
        .collect();
    ChatRequest {
        model: model.to_string(),
        messages: api_messages,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        stream: settings.streaming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use charla_gateway::StreamEventStream;
    use std::time::Duration;

    /// Scripted gateway: records requests, replays canned outcomes.
    struct MockGateway {
        requests: Mutex<Vec<ChatRequest>>,
        stream_script: Mutex<Vec<charla_gateway::Result<Vec<StreamEvent>>>>,
        chat_script: Mutex<Vec<charla_gateway::Result<String>>>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl MockGateway {
        fn streaming(script: Vec<charla_gateway::Result<Vec<StreamEvent>>>) -> Self {
            Self {
                requests: Mutex::new(vec![]),
                stream_script: Mutex::new(script),
                chat_script: Mutex::new(vec![]),
                gate: None,
            }
        }

        fn non_streaming(script: Vec<charla_gateway::Result<String>>) -> Self {
            Self {
                requests: Mutex::new(vec![]),
                stream_script: Mutex::new(vec![]),
                chat_script: Mutex::new(script),
                gate: None,
            }
        }

        /// Streams wait on the notify before yielding their events.
        fn gated(
            script: Vec<charla_gateway::Result<Vec<StreamEvent>>>,
            gate: Arc<tokio::sync::Notify>,
        ) -> Self {
            Self {
                requests: Mutex::new(vec![]),
                stream_script: Mutex::new(script),
                chat_script: Mutex::new(vec![]),
                gate: Some(gate),
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl Gateway for MockGateway {
        async fn chat(&self, request: &ChatRequest) -> charla_gateway::Result<String> {
            self.requests.lock().push(request.clone());
            self.chat_script.lock().remove(0)
        }

        async fn chat_stream(
            &self,
            request: &ChatRequest,
        ) -> charla_gateway::Result<StreamEventStream> {
            self.requests.lock().push(request.clone());
            let events = self.stream_script.lock().remove(0)?;
            let gate = self.gate.clone();
            Ok(Box::pin(async_stream::stream! {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                for event in events {
                    yield event;
                }
            }))
        }

        async fn list_models(&self) -> charla_gateway::Result<Vec<String>> {
            Ok(vec!["mock-model".to_string()])
        }

        async fn login(&self, password: &str) -> charla_gateway::Result<bool> {
            Ok(password == "secreta")
        }
    }

    fn app_with(gateway: MockGateway) -> (ChatApp, Arc<MockGateway>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_dir(dir.path());
        let gateway = Arc::new(gateway);
        let app = ChatApp::new(Arc::clone(&gateway) as Arc<dyn Gateway>, storage).unwrap();
        (app, gateway, dir)
    }

    fn delta(s: &str) -> StreamEvent {
        StreamEvent::Delta(s.to_string())
    }

    #[tokio::test]
    async fn test_streaming_send_with_reasoning() {
        let gateway = MockGateway::streaming(vec![Ok(vec![
            delta("[THINK]pien"),
            delta("so[/THINK]"),
            delta("Hola"),
            delta(" mundo"),
            StreamEvent::Done,
        ])]);
        let (app, _mock, _dir) = app_with(gateway);

        app.send("m", "saludo", vec![]).await.unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        assert_eq!(conversation.title, "saludo");
        let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Reasoning, Role::Assistant]
        );
        assert_eq!(conversation.messages[2].content, "pienso");
        assert_eq!(conversation.messages[3].content, "Hola mundo");
    }

    #[tokio::test]
    async fn test_system_prompt_prepended_only_once() {
        let gateway = MockGateway::streaming(vec![
            Ok(vec![delta("uno"), StreamEvent::Done]),
            Ok(vec![delta("dos"), StreamEvent::Done]),
        ]);
        let (app, _mock, _dir) = app_with(gateway);

        app.send("m", "primera", vec![]).await.unwrap();
        app.send("m", "segunda", vec![]).await.unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        let systems = conversation
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(systems, 1);
        assert_eq!(conversation.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_in_band_error_replaces_answer() {
        let gateway = MockGateway::streaming(vec![Ok(vec![
            delta("parcial"),
            StreamEvent::Error {
                message: "boom".into(),
                details: Some("sin GPU".into()),
            },
        ])]);
        let (app, _mock, _dir) = app_with(gateway);

        app.send("m", "hola", vec![]).await.unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        let last = conversation.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Error: boom. sin GPU");
    }

    #[tokio::test]
    async fn test_gateway_failure_surfaces_as_assistant_message() {
        let gateway = MockGateway::streaming(vec![Err(charla_gateway::Error::gateway(
            503,
            "no disponible",
            None,
        ))]);
        let (app, _mock, _dir) = app_with(gateway);

        // The call itself succeeds; the failure is in the transcript.
        app.send("m", "hola", vec![]).await.unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        assert_eq!(
            conversation.messages.last().unwrap().content,
            "Error: no disponible."
        );
    }

    #[tokio::test]
    async fn test_non_streaming_send_takes_content_verbatim() {
        let gateway =
            MockGateway::non_streaming(vec![Ok("[THINK]calculo[/THINK]cuatro".to_string())]);
        let (app, _mock, _dir) = app_with(gateway);
        let mut settings = app.settings();
        settings.streaming = false;
        app.set_settings(settings).unwrap();

        app.send("m", "2+2", vec![]).await.unwrap();

        // One atomic update, sentinels left in place, no reasoning message.
        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        assert!(
            !conversation
                .messages
                .iter()
                .any(|m| m.role == Role::Reasoning)
        );
        let last = conversation.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "[THINK]calculo[/THINK]cuatro");
    }

    #[tokio::test]
    async fn test_reasoning_messages_not_sent_to_model() {
        let gateway = MockGateway::streaming(vec![
            Ok(vec![
                delta("[THINK]r[/THINK]respuesta"),
                StreamEvent::Done,
            ]),
            Ok(vec![delta("segunda"), StreamEvent::Done]),
        ]);
        let (app, mock, _dir) = app_with(gateway);

        app.send("m", "una", vec![]).await.unwrap();
        app.send("m", "otra", vec![]).await.unwrap();

        // The transcript holds a reasoning message after the first send,
        // but the second request's context must not.
        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        assert!(
            conversation
                .messages
                .iter()
                .any(|m| m.role == Role::Reasoning)
        );
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        let roles: Vec<&str> = requests[1].messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn test_second_send_while_generating_is_busy() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let gateway = MockGateway::gated(
            vec![Ok(vec![delta("lenta"), StreamEvent::Done])],
            Arc::clone(&gate),
        );
        let (app, _mock, _dir) = app_with(gateway);
        let app = Arc::new(app);

        let first = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.send("m", "primera", vec![]).await })
        };
        // Let the first send reach its gated stream.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(app.is_generating());
        assert!(matches!(
            app.send("m", "segunda", vec![]).await,
            Err(Error::Busy)
        ));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(!app.is_generating());
    }

    #[tokio::test]
    async fn test_delete_mid_stream_drops_writes() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let gateway = MockGateway::gated(
            vec![Ok(vec![delta("fantasma"), StreamEvent::Done])],
            Arc::clone(&gate),
        );
        let (app, _mock, _dir) = app_with(gateway);
        let app = Arc::new(app);
        let id = app.store().active_id().unwrap();

        let send = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.send("m", "hola", vec![]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        app.delete_conversation(&id).unwrap();

        gate.notify_one();
        send.await.unwrap().unwrap();
        assert!(app.store().get(&id).is_none());
    }

    #[tokio::test]
    async fn test_generation_ended_names_originating_conversation() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let gateway = MockGateway::gated(
            vec![Ok(vec![delta("hola"), StreamEvent::Done])],
            Arc::clone(&gate),
        );
        let (app, _mock, _dir) = app_with(gateway);
        let app = Arc::new(app);
        let id = app.store().active_id().unwrap();
        let mut events = app.subscribe();

        let send = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.send("m", "hola", vec![]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Deleting the only conversation leaves nothing active, but the
        // terminal event still names the conversation the send ran against.
        app.delete_conversation(&id).unwrap();
        gate.notify_one();
        send.await.unwrap().unwrap();

        let mut ended = vec![];
        while let Ok(event) = events.try_recv() {
            if let StateEvent::GenerationEnded { conversation_id } = event {
                ended.push(conversation_id);
            }
        }
        assert_eq!(ended, vec![id]);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let gateway = MockGateway::streaming(vec![]);
        let (app, _mock, _dir) = app_with(gateway);
        assert!(matches!(
            app.send("m", "   ", vec![]).await,
            Err(Error::EmptyPrompt)
        ));
    }

    #[tokio::test]
    async fn test_image_only_prompt_titled_imagen() {
        let gateway = MockGateway::streaming(vec![Ok(vec![delta("veo"), StreamEvent::Done])]);
        let (app, _mock, _dir) = app_with(gateway);

        app.send(
            "m",
            "",
            vec![Attachment::image("foto.png", "data:image/png;base64,AAAA")],
        )
        .await
        .unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        assert_eq!(conversation.title, "Imagen");
        let user = conversation
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert_eq!(user.images.len(), 1);
    }

    #[tokio::test]
    async fn test_file_attachment_inlined_into_prompt() {
        let gateway = MockGateway::streaming(vec![Ok(vec![delta("leído"), StreamEvent::Done])]);
        let (app, _mock, _dir) = app_with(gateway);

        app.send(
            "m",
            "resume esto",
            vec![Attachment::file("notas.txt", "contenido")],
        )
        .await
        .unwrap();

        let conversation = app.store().get(&app.store().active_id().unwrap()).unwrap();
        let user = conversation
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert_eq!(user.content, "resume esto\n\n[Archivo: notas.txt]\ncontenido");
    }

    #[tokio::test]
    async fn test_login_sets_flag() {
        let gateway = MockGateway::streaming(vec![]);
        let (app, _mock, _dir) = app_with(gateway);
        assert!(!app.is_logged_in());
        assert!(!app.login("mal").await.unwrap());
        assert!(!app.is_logged_in());
        assert!(app.login("secreta").await.unwrap());
        assert!(app.is_logged_in());
    }

    #[test]
    fn test_build_request_filters_reasoning_and_builds_multipart() {
        let messages = vec![
            Message::system("sys"),
            Message::user("mira", vec!["data:image/png;base64,AAAA".to_string()]),
            Message::reasoning("secreto"),
            Message::assistant("ok"),
        ];
        let request = build_request("m", &messages, &Settings::default());
        assert_eq!(request.messages.len(), 3);
        assert!(matches!(
            request.messages[1].content,
            charla_gateway::wire::ApiContent::Parts(ref parts) if parts.len() == 2
        ));
    }
}
