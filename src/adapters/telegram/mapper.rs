//! Map grammers TL media types to domain FileDescriptors.
//!
//! The media field of a message is a tagged union across a dozen variants;
//! each streamable one has its own extraction path here. Anything else
//! fails with a precise "unsupported media type" naming the variant.

use grammers_client::tl;
use grammers_tl_types::Serializable;

use crate::domain::{DomainError, FileDescriptor, LocationHandle};

/// Extract the descriptor from a raw message. Web pages without embedded
/// media fall back to URL extraction from the message entities.
pub fn descriptor_from_message(msg: &tl::types::Message) -> Result<FileDescriptor, DomainError> {
    let media = msg
        .media
        .as_ref()
        .ok_or_else(|| DomainError::Input("message has no media".into()))?;
    let mut descriptor = descriptor_from_media(media, &msg.message, msg.entities.as_deref())?;
    descriptor.chat_id = dialog_id(&msg.peer_id);
    Ok(descriptor)
}

/// Bot API dialog id of the peer a message lives in: users keep their id,
/// basic groups are negated, channels get the -100… prefix.
fn dialog_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u) => u.user_id,
        tl::enums::Peer::Chat(c) => -c.chat_id,
        tl::enums::Peer::Channel(c) => -1_000_000_000_000 - c.channel_id,
    }
}

fn descriptor_from_media(
    media: &tl::enums::MessageMedia,
    text: &str,
    entities: Option<&[tl::enums::MessageEntity]>,
) -> Result<FileDescriptor, DomainError> {
    match media {
        tl::enums::MessageMedia::Document(md) => {
            let doc = md
                .document
                .as_ref()
                .ok_or_else(|| DomainError::UnsupportedMedia("empty document".into()))?;
            from_document(doc, None)
        }
        tl::enums::MessageMedia::Photo(mp) => {
            let photo = mp
                .photo
                .as_ref()
                .ok_or_else(|| DomainError::UnsupportedMedia("empty photo".into()))?;
            from_photo(photo)
        }
        tl::enums::MessageMedia::WebPage(mw) => from_web_page(&mw.webpage, text, entities),
        other => Err(DomainError::UnsupportedMedia(variant_name(other).into())),
    }
}

fn from_web_page(
    webpage: &tl::enums::WebPage,
    text: &str,
    entities: Option<&[tl::enums::MessageEntity]>,
) -> Result<FileDescriptor, DomainError> {
    match webpage {
        tl::enums::WebPage::Page(page) => {
            if let Some(doc) = &page.document {
                return from_document(doc, page.title.as_deref());
            }
            if let Some(photo) = &page.photo {
                return from_photo(photo);
            }
            Ok(external_descriptor(page.url.clone()))
        }
        // No preview data yet (or ever): the message text still carries the
        // URL the user sent.
        tl::enums::WebPage::Empty(_) | tl::enums::WebPage::Pending(_) => {
            let url = url_from_entities(text, entities).ok_or_else(|| {
                DomainError::UnsupportedMedia("web page without extractable URL".into())
            })?;
            Ok(external_descriptor(url))
        }
        tl::enums::WebPage::NotModified(_) => {
            Err(DomainError::UnsupportedMedia("webPageNotModified".into()))
        }
    }
}

fn from_document(
    document: &tl::enums::Document,
    fallback_name: Option<&str>,
) -> Result<FileDescriptor, DomainError> {
    let doc = match document {
        tl::enums::Document::Document(doc) => doc,
        tl::enums::Document::Empty(_) => {
            return Err(DomainError::UnsupportedMedia("documentEmpty".into()))
        }
    };

    let mut name = String::new();
    let mut width = 0;
    let mut height = 0;
    let mut duration = 0.0f64;
    let mut title = String::new();
    let mut performer = String::new();
    let mut is_voice = false;
    let mut is_animation = false;

    for attribute in &doc.attributes {
        match attribute {
            tl::enums::DocumentAttribute::Filename(f) => name = f.file_name.clone(),
            tl::enums::DocumentAttribute::Video(v) => {
                width = v.w;
                height = v.h;
                duration = v.duration;
            }
            tl::enums::DocumentAttribute::Audio(a) => {
                duration = a.duration as f64;
                title = a.title.clone().unwrap_or_default();
                performer = a.performer.clone().unwrap_or_default();
                is_voice = a.voice;
            }
            tl::enums::DocumentAttribute::Animated(_) => is_animation = true,
            _ => {}
        }
    }

    if name.is_empty() {
        name = fallback_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("file_{}.{}", doc.id, extension_for(&doc.mime_type)));
    }

    let location = tl::enums::InputFileLocation::InputDocumentFileLocation(
        tl::types::InputDocumentFileLocation {
            id: doc.id,
            access_hash: doc.access_hash,
            file_reference: doc.file_reference.clone(),
            thumb_size: String::new(),
        },
    );

    Ok(FileDescriptor {
        id: doc.id,
        chat_id: 0,
        location: LocationHandle(location.to_bytes()),
        size: doc.size,
        name,
        mime: doc.mime_type.clone(),
        width,
        height,
        duration,
        title,
        performer,
        is_voice,
        is_animation,
        external_url: None,
    })
}

fn from_photo(photo: &tl::enums::Photo) -> Result<FileDescriptor, DomainError> {
    let photo = match photo {
        tl::enums::Photo::Photo(photo) => photo,
        tl::enums::Photo::Empty(_) => {
            return Err(DomainError::UnsupportedMedia("photoEmpty".into()))
        }
    };

    // Widest size wins; progressive sizes report their largest payload.
    let mut best: Option<(i32, i32, i64, String)> = None;
    for size in &photo.sizes {
        let candidate = match size {
            tl::enums::PhotoSize::Size(s) => {
                Some((s.w, s.h, s.size as i64, s.r#type.clone()))
            }
            tl::enums::PhotoSize::Progressive(p) => {
                let bytes = p.sizes.last().copied().unwrap_or(0) as i64;
                Some((p.w, p.h, bytes, p.r#type.clone()))
            }
            _ => None,
        };
        if let Some(candidate) = candidate {
            if best.as_ref().is_none_or(|b| candidate.0 > b.0) {
                best = Some(candidate);
            }
        }
    }
    let (width, height, size, size_type) = best
        .ok_or_else(|| DomainError::UnsupportedMedia("photo without downloadable size".into()))?;

    let mime = mime_for_size_type(&size_type);
    let location =
        tl::enums::InputFileLocation::InputPhotoFileLocation(tl::types::InputPhotoFileLocation {
            id: photo.id,
            access_hash: photo.access_hash,
            file_reference: photo.file_reference.clone(),
            thumb_size: size_type,
        });

    Ok(FileDescriptor {
        id: photo.id,
        chat_id: 0,
        location: LocationHandle(location.to_bytes()),
        size,
        name: format!("photo_{}.{}", photo.id, extension_for(mime)),
        mime: mime.to_string(),
        width,
        height,
        duration: 0.0,
        title: String::new(),
        performer: String::new(),
        is_voice: false,
        is_animation: false,
        external_url: None,
    })
}

/// Descriptor for a URL the bridge streams through the pass-through proxy.
fn external_descriptor(url: String) -> FileDescriptor {
    let mime = url::Url::parse(&url)
        .ok()
        .and_then(|u| {
            mime_guess::from_path(u.path())
                .first_raw()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "audio/mpeg".to_string());
    FileDescriptor {
        id: 0,
        chat_id: 0,
        location: LocationHandle(Vec::new()),
        size: 0,
        name: "external_media".into(),
        mime,
        width: 0,
        height: 0,
        duration: 0.0,
        title: String::new(),
        performer: String::new(),
        is_voice: false,
        is_animation: false,
        external_url: Some(url),
    }
}

/// First URL carried by the message entities: plain `Url` entities slice
/// the text (UTF-16 offsets, as Telegram counts them), `TextUrl` entities
/// carry the target directly.
fn url_from_entities(
    text: &str,
    entities: Option<&[tl::enums::MessageEntity]>,
) -> Option<String> {
    for entity in entities? {
        match entity {
            tl::enums::MessageEntity::Url(u) => {
                if let Some(url) = utf16_substr(text, u.offset, u.length) {
                    return Some(url);
                }
            }
            tl::enums::MessageEntity::TextUrl(t) => return Some(t.url.clone()),
            _ => {}
        }
    }
    None
}

fn utf16_substr(text: &str, offset: i32, length: i32) -> Option<String> {
    if offset < 0 || length <= 0 {
        return None;
    }
    let units: Vec<u16> = text.encode_utf16().collect();
    let start = offset as usize;
    let end = start.checked_add(length as usize)?;
    if end > units.len() {
        return None;
    }
    Some(String::from_utf16_lossy(&units[start..end]))
}

/// Photo size-type codes map straight onto image formats.
fn mime_for_size_type(size_type: &str) -> &'static str {
    match size_type.chars().next() {
        Some('p') => "image/png",
        Some('w') => "image/webp",
        Some('g') => "image/gif",
        _ => "image/jpeg",
    }
}

fn extension_for(mime: &str) -> &str {
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("bin")
}

fn variant_name(media: &tl::enums::MessageMedia) -> &'static str {
    match media {
        tl::enums::MessageMedia::Empty(_) => "messageMediaEmpty",
        tl::enums::MessageMedia::Photo(_) => "messageMediaPhoto",
        tl::enums::MessageMedia::Geo(_) => "messageMediaGeo",
        tl::enums::MessageMedia::Contact(_) => "messageMediaContact",
        tl::enums::MessageMedia::Unsupported(_) => "messageMediaUnsupported",
        tl::enums::MessageMedia::Document(_) => "messageMediaDocument",
        tl::enums::MessageMedia::WebPage(_) => "messageMediaWebPage",
        tl::enums::MessageMedia::Venue(_) => "messageMediaVenue",
        tl::enums::MessageMedia::Game(_) => "messageMediaGame",
        tl::enums::MessageMedia::Invoice(_) => "messageMediaInvoice",
        tl::enums::MessageMedia::GeoLive(_) => "messageMediaGeoLive",
        tl::enums::MessageMedia::Poll(_) => "messageMediaPoll",
        tl::enums::MessageMedia::Dice(_) => "messageMediaDice",
        _ => "unrecognized message media variant",
    }
}
