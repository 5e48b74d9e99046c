use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

/// Maximum element nesting accepted before the document is rejected.
const MAX_DEPTH: usize = 64;

const DUBLIN_CORE_NS: &[u8] = b"http://purl.org/dc/elements/1.1/";

/// Errors from decoding a fetched payload. No partial result is ever returned.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not well-formed XML
    #[error("Malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Character data is not valid UTF-8
    #[error("Invalid text encoding: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// The document ended with elements still open
    #[error("Document is truncated ({0} unclosed elements)")]
    Truncated(usize),
    /// The root element is not `<rss>`
    #[error("Not an RSS document (root element <{0}>)")]
    NotRss(String),
    /// `<rss>` has no `<channel>`
    #[error("RSS document has no <channel>")]
    MissingChannel,
    #[error("Element nesting exceeds maximum of {0} levels")]
    TooDeep(usize),
}

/// Channel metadata plus items in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub items: Vec<ParsedItem>,
}

/// One `<item>`. All fields are opaque trimmed text; missing ones are empty.
///
/// `description` is the raw (unsanitized) body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub pub_date: String,
    pub format: String,
    pub identifier: String,
}

#[derive(Clone, Copy)]
enum ChannelField {
    Title,
    Description,
}

#[derive(Clone, Copy)]
enum ItemField {
    Title,
    Link,
    Guid,
    Description,
    PubDate,
    Format,
    Identifier,
}

/// Namespace of an opened element, as far as field matching cares.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ElementNs {
    /// No namespace: plain RSS 2.0 elements
    None,
    DublinCore,
    /// Any extension (`itunes:`, `media:`, `atom:`, ...)
    Other,
}

impl ElementNs {
    fn classify(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Unbound => Self::None,
            ResolveResult::Bound(Namespace(ns)) if *ns == DUBLIN_CORE_NS => Self::DublinCore,
            // Undeclared `dc:` prefixes are common enough to accept
            ResolveResult::Unknown(prefix) if prefix.as_slice() == b"dc" => Self::DublinCore,
            _ => Self::Other,
        }
    }
}

impl ItemField {
    /// Core RSS fields only match un-namespaced elements, so extension
    /// elements like `itunes:title` or `atom:link` never feed into them.
    fn from_element(name: &[u8], ns: ElementNs) -> Option<Self> {
        match (ns, name) {
            (ElementNs::None, b"title") => Some(Self::Title),
            (ElementNs::None, b"link") => Some(Self::Link),
            (ElementNs::None, b"guid") => Some(Self::Guid),
            (ElementNs::None, b"description") => Some(Self::Description),
            (ElementNs::None, b"pubDate") => Some(Self::PubDate),
            (ElementNs::None | ElementNs::DublinCore, b"format") => Some(Self::Format),
            (ElementNs::None | ElementNs::DublinCore, b"identifier") => Some(Self::Identifier),
            _ => None,
        }
    }

    fn slot(self, item: &mut ParsedItem) -> &mut String {
        match self {
            Self::Title => &mut item.title,
            Self::Link => &mut item.link,
            Self::Guid => &mut item.guid,
            Self::Description => &mut item.description,
            Self::PubDate => &mut item.pub_date,
            Self::Format => &mut item.format,
            Self::Identifier => &mut item.identifier,
        }
    }
}

/// Where captured character data goes.
enum Capture {
    None,
    Channel(ChannelField),
    Item(ItemField),
}

/// Decode an RSS 2.0 document (`rss/channel/item`).
///
/// Only direct character data of a field element is captured; markup nested
/// inside a field (rather than escaped or in CDATA) is skipped. A repeated
/// field element replaces the earlier value. Dates are not interpreted.
///
/// # Errors
///
/// Returns [`ParseError`] for malformed, truncated, or non-RSS documents.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // Text is trimmed per field, not per event, so `a <![CDATA[b]]>` keeps its space
    let mut reader = NsReader::from_reader(bytes);

    let mut feed = ParsedFeed::default();
    let mut buf = Vec::new();
    // Local names of currently open elements
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_channel = false;
    let mut current_item: Option<ParsedItem> = None;
    let mut capture = Capture::None;
    // Depth at which `capture` was opened; text deeper than this is ignored
    let mut capture_depth = 0usize;

    loop {
        let (resolved, event) = reader.read_resolved_event_into(&mut buf)?;
        match event {
            Event::Start(e) => {
                let ns = ElementNs::classify(&resolved);
                let name = e.local_name().as_ref().to_vec();
                if stack.is_empty() && name.as_slice() != b"rss" {
                    return Err(ParseError::NotRss(String::from_utf8_lossy(&name).into_owned()));
                }
                stack.push(name);
                if stack.len() > MAX_DEPTH {
                    return Err(ParseError::TooDeep(MAX_DEPTH));
                }
                if matches!(capture, Capture::None) {
                    capture = open_element(&stack, ns, &mut saw_channel, &mut current_item);
                    capture_depth = stack.len();
                    clear(&capture, &mut feed, &mut current_item);
                }
            }
            Event::Empty(e) => {
                // A self-closing root is still a root
                if stack.is_empty() && e.local_name().as_ref() != b"rss" {
                    return Err(ParseError::NotRss(
                        String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ));
                }
                if stack.len() == 1 && e.local_name().as_ref() == b"channel" {
                    saw_channel = true;
                }
                if stack.len() == 2 && e.local_name().as_ref() == b"item" && is_channel(&stack) {
                    feed.items.push(ParsedItem::default());
                }
            }
            Event::End(_) => {
                let depth = stack.len();
                if depth == capture_depth && !matches!(capture, Capture::None) {
                    capture = Capture::None;
                }
                if depth == 3 && is_item_path(&stack) {
                    if let Some(item) = current_item.take() {
                        feed.items.push(trim_item(item));
                    }
                }
                stack.pop();
            }
            Event::Text(e) => {
                if stack.len() == capture_depth {
                    let text = e.unescape()?;
                    append(&capture, &mut feed, &mut current_item, &text);
                }
            }
            Event::CData(e) => {
                if stack.len() == capture_depth {
                    let text = std::str::from_utf8(&e)?;
                    append(&capture, &mut feed, &mut current_item, text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ParseError::Truncated(stack.len()));
    }
    if !saw_channel {
        return Err(ParseError::MissingChannel);
    }

    feed.title = feed.title.trim().to_string();
    feed.description = feed.description.trim().to_string();
    Ok(feed)
}

/// Decide what an opening element at the top of `stack` should capture.
fn open_element(
    stack: &[Vec<u8>],
    ns: ElementNs,
    saw_channel: &mut bool,
    current_item: &mut Option<ParsedItem>,
) -> Capture {
    let name = stack[stack.len() - 1].as_slice();
    match stack.len() {
        2 if name == b"channel" => {
            *saw_channel = true;
            Capture::None
        }
        3 if is_channel(&stack[..2]) => match name {
            b"item" => {
                *current_item = Some(ParsedItem::default());
                Capture::None
            }
            b"title" if ns == ElementNs::None => Capture::Channel(ChannelField::Title),
            b"description" if ns == ElementNs::None => {
                Capture::Channel(ChannelField::Description)
            }
            _ => Capture::None,
        },
        4 if is_item_path(&stack[..3]) => ItemField::from_element(name, ns)
            .map(Capture::Item)
            .unwrap_or(Capture::None),
        _ => Capture::None,
    }
}

fn is_channel(stack: &[Vec<u8>]) -> bool {
    stack.len() >= 2 && stack[1].as_slice() == b"channel"
}

fn is_item_path(stack: &[Vec<u8>]) -> bool {
    stack.len() >= 3 && is_channel(stack) && stack[2].as_slice() == b"item"
}

fn clear(capture: &Capture, feed: &mut ParsedFeed, current_item: &mut Option<ParsedItem>) {
    match capture {
        Capture::None => {}
        Capture::Channel(ChannelField::Title) => feed.title.clear(),
        Capture::Channel(ChannelField::Description) => feed.description.clear(),
        Capture::Item(field) => {
            if let Some(item) = current_item.as_mut() {
                field.slot(item).clear();
            }
        }
    }
}

fn append(
    capture: &Capture,
    feed: &mut ParsedFeed,
    current_item: &mut Option<ParsedItem>,
    text: &str,
) {
    match capture {
        Capture::None => {}
        Capture::Channel(ChannelField::Title) => feed.title.push_str(text),
        Capture::Channel(ChannelField::Description) => feed.description.push_str(text),
        Capture::Item(field) => {
            if let Some(item) = current_item.as_mut() {
                field.slot(item).push_str(text);
            }
        }
    }
}

fn trim_item(mut item: ParsedItem) -> ParsedItem {
    for field in [
        ItemField::Title,
        ItemField::Link,
        ItemField::Guid,
        ItemField::Description,
        ItemField::PubDate,
        ItemField::Format,
        ItemField::Identifier,
    ] {
        let slot = field.slot(&mut item);
        let trimmed = slot.trim();
        if trimmed.len() != slot.len() {
            *slot = trimmed.to_string();
        }
    }
    item
}
