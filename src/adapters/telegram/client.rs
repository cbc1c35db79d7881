//! Implements TelegramGateway using the grammers Client.
//!
//! Handles FloodWait by sleeping and retrying. Uses raw invoke for
//! message lookup (messages.getMessages) and ranged file download
//! (upload.getFile), the same way the update stream hands us raw TL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use grammers_client::tl;
use grammers_client::{Client, InvocationError};
use grammers_tl_types::Deserializable;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapters::telegram::mapper;
use crate::domain::{DomainError, FileDescriptor, LocationHandle};
use crate::ports::TelegramGateway;

/// Telegram caps upload.getFile responses; blocks are assembled from
/// requests of this size (offsets stay 4 KiB-aligned as the API requires).
const UPLOAD_CHUNK: u64 = 512 * 1024;

/// Attempts per RPC before giving up on repeated FloodWait.
const MAX_ATTEMPTS: u32 = 3;

/// Media gateway adapter. Wraps the shared grammers client handle; every
/// component borrows the same reconnecting session.
pub struct GrammersMediaGateway {
    client: Client,
    /// InputPeer by chat id, filled from updates so avatar downloads never
    /// need a dialog scan.
    peer_cache: Mutex<HashMap<i64, tl::enums::InputPeer>>,
}

impl GrammersMediaGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            peer_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Remember the InputPeer for a chat. Called by the bot runner for
    /// every update it sees.
    pub async fn remember_peer(&self, chat_id: i64, peer: tl::enums::InputPeer) {
        self.peer_cache.lock().await.insert(chat_id, peer);
    }

    async fn cached_peer(&self, chat_id: i64) -> Option<tl::enums::InputPeer> {
        self.peer_cache.lock().await.get(&chat_id).cloned()
    }

    /// Invoke with bounded FloodWait retries (RPC error 420).
    async fn invoke<R>(&self, request: &R) -> Result<R::Return, DomainError>
    where
        R: grammers_tl_types::RemoteCall,
    {
        let mut wait_secs = 0;
        for attempt in 0..MAX_ATTEMPTS {
            match self.client.invoke(request).await {
                Ok(response) => return Ok(response),
                Err(InvocationError::Rpc(rpc)) if rpc.code == 420 => {
                    wait_secs = rpc.value.unwrap_or(60) as u64;
                    if attempt + 1 < MAX_ATTEMPTS {
                        warn!(attempt, wait_secs, "FloodWait, sleeping");
                        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    }
                }
                Err(e) => return Err(DomainError::Upstream(e.to_string())),
            }
        }
        Err(DomainError::FloodWait { seconds: wait_secs })
    }

    /// upload.getFile with FloodWait and FILE_MIGRATE handling. A learned
    /// datacenter sticks for the rest of the transfer via `dc_id`.
    async fn invoke_file(
        &self,
        request: &tl::functions::upload::GetFile,
        dc_id: &mut Option<i32>,
    ) -> Result<tl::enums::upload::File, DomainError> {
        for attempt in 0..MAX_ATTEMPTS {
            let result = match *dc_id {
                Some(dc) => self.client.invoke_in_dc(dc, request).await,
                None => self.client.invoke(request).await,
            };
            match result {
                Ok(file) => return Ok(file),
                Err(InvocationError::Rpc(rpc))
                    if rpc.name == "FILE_MIGRATE" && rpc.value.is_some() =>
                {
                    let dc = rpc.value.unwrap_or_default() as i32;
                    debug!(dc, "file lives on another datacenter");
                    *dc_id = Some(dc);
                }
                Err(InvocationError::Rpc(rpc)) if rpc.code == 420 => {
                    let wait_secs = rpc.value.unwrap_or(60) as u64;
                    warn!(attempt, wait_secs, "FloodWait on getFile, sleeping");
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                }
                Err(e) => return Err(DomainError::Upstream(e.to_string())),
            }
        }
        Err(DomainError::Upstream("getFile retries exhausted".into()))
    }

    fn decode_location(
        location: &LocationHandle,
    ) -> Result<tl::enums::InputFileLocation, DomainError> {
        tl::enums::InputFileLocation::from_bytes(&location.0)
            .map_err(|e| DomainError::Upstream(format!("undecodable file location: {:?}", e)))
    }

    /// Download `[offset, offset+len)` from an already-decoded location.
    /// Files hosted on another datacenter answer with FILE_MIGRATE; the
    /// remaining chunks then go straight to that DC.
    async fn fetch_range(
        &self,
        location: &tl::enums::InputFileLocation,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, DomainError> {
        let mut out = BytesMut::with_capacity(len as usize);
        let mut pos = offset;
        let end = offset + len;
        let mut dc_id: Option<i32> = None;

        while pos < end {
            let chunk = UPLOAD_CHUNK.min(end - pos);
            let request = tl::functions::upload::GetFile {
                precise: true,
                cdn_supported: false,
                location: location.clone(),
                offset: pos as i64,
                limit: chunk as i32,
            };
            match self.invoke_file(&request, &mut dc_id).await? {
                tl::enums::upload::File::File(file) => {
                    if file.bytes.is_empty() {
                        break; // past end of file
                    }
                    let got = file.bytes.len() as u64;
                    out.extend_from_slice(&file.bytes);
                    pos += got;
                    if got < chunk {
                        break; // tail of the file
                    }
                }
                tl::enums::upload::File::CdnRedirect(_) => {
                    return Err(DomainError::Upstream(
                        "unexpected CDN redirect with cdn_supported = false".into(),
                    ));
                }
            }
        }

        debug!(offset, requested = len, got = out.len(), "fetched file range");
        Ok(out.freeze())
    }
}

#[async_trait]
impl TelegramGateway for GrammersMediaGateway {
    async fn resolve_media(&self, message_id: i32) -> Result<FileDescriptor, DomainError> {
        use tl::enums::messages::Messages;

        let request = tl::functions::messages::GetMessages {
            id: vec![tl::enums::InputMessage::Id(tl::types::InputMessageId {
                id: message_id,
            })],
        };

        let messages = match self.invoke(&request).await? {
            Messages::Messages(m) => m.messages,
            Messages::Slice(m) => m.messages,
            Messages::ChannelMessages(m) => m.messages,
            Messages::NotModified(_) => Vec::new(),
        };

        let message = messages
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::Input(format!("message {} not found", message_id)))?;

        match message {
            tl::enums::Message::Message(m) => mapper::descriptor_from_message(&m),
            tl::enums::Message::Empty(_) | tl::enums::Message::Service(_) => Err(
                DomainError::Input(format!("message {} has no media", message_id)),
            ),
        }
    }

    async fn download_block(
        &self,
        location: &LocationHandle,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, DomainError> {
        let location = Self::decode_location(location)?;
        self.fetch_range(&location, offset, len).await
    }

    async fn download_avatar(&self, chat_id: i64) -> Result<Option<Bytes>, DomainError> {
        use tl::enums::photos::Photos;

        let Some(tl::enums::InputPeer::User(user)) = self.cached_peer(chat_id).await else {
            return Ok(None);
        };

        let request = tl::functions::photos::GetUserPhotos {
            user_id: tl::enums::InputUser::User(tl::types::InputUser {
                user_id: user.user_id,
                access_hash: user.access_hash,
            }),
            offset: 0,
            max_id: 0,
            limit: 1,
        };
        let photos = match self.invoke(&request).await? {
            Photos::Photos(p) => p.photos,
            Photos::Slice(p) => p.photos,
        };
        let Some(tl::enums::Photo::Photo(photo)) = photos.into_iter().next() else {
            return Ok(None);
        };

        // Small peer-photo variant; fetch_range stops at the first short
        // chunk, so one block's worth of length covers any avatar.
        let location = tl::enums::InputFileLocation::InputPeerPhotoFileLocation(
            tl::types::InputPeerPhotoFileLocation {
                big: false,
                peer: tl::enums::InputPeer::User(user),
                photo_id: photo.id,
            },
        );
        let bytes = self
            .fetch_range(&location, 0, crate::domain::BLOCK_SIZE)
            .await?;
        Ok(Some(bytes))
    }
}
