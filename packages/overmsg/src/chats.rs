//! Inbound messages grouped per peer, as a chat list shows them.

use overmsg_core::InboundMessage;

/// Longest preview shown as-is, in characters.
const PREVIEW_MAX: usize = 21;
/// Characters kept before the ellipsis when a preview is cut.
const PREVIEW_KEEP: usize = 18;

#[derive(Debug, Clone)]
pub struct Chat {
    pub peer: String,
    pub messages: Vec<InboundMessage>,
}

impl Chat {
    /// Last message, shortened for a one-line list entry.
    pub fn preview(&self) -> String {
        let Some(last) = self.messages.last() else {
            return "[no messages]".to_string();
        };
        if last.body.chars().count() > PREVIEW_MAX {
            let mut cut: String = last.body.chars().take(PREVIEW_KEEP).collect();
            cut.push_str("...");
            cut
        } else {
            last.body.clone()
        }
    }
}

/// Chats in the order their first message arrived.
#[derive(Debug, Default)]
pub struct ChatList {
    chats: Vec<Chat>,
}

impl ChatList {
    pub fn push(&mut self, msg: InboundMessage) {
        match self.chats.iter_mut().find(|c| c.peer == msg.from) {
            Some(chat) => chat.messages.push(msg),
            None => self.chats.push(Chat {
                peer: msg.from.clone(),
                messages: vec![msg],
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chat> {
        self.chats.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chat<'a>(list: &'a ChatList, peer: &str) -> &'a Chat {
        list.iter().find(|c| c.peer == peer).unwrap()
    }

    fn msg(from: &str, body: &str) -> InboundMessage {
        InboundMessage {
            from: from.to_string(),
            body: body.to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_groups_by_peer_in_arrival_order() {
        let mut list = ChatList::default();
        list.push(msg("bob", "one"));
        list.push(msg("amy", "hi"));
        list.push(msg("bob", "two"));

        let peers: Vec<_> = list.iter().map(|c| c.peer.as_str()).collect();
        assert_eq!(peers, ["bob", "amy"]);

        let bob = chat(&list, "bob");
        let bodies: Vec<_> = bob.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one", "two"]);
    }

    #[test]
    fn test_preview_short_message() {
        let mut list = ChatList::default();
        list.push(msg("bob", "exactly twenty-one ch"));
        assert_eq!(chat(&list, "bob").preview(), "exactly twenty-one ch");
    }

    #[test]
    fn test_preview_truncates_long_message() {
        let mut list = ChatList::default();
        list.push(msg("bob", "this message is definitely too long"));
        assert_eq!(chat(&list, "bob").preview(), "this message is de...");
    }

    #[test]
    fn test_preview_counts_characters_not_bytes() {
        let mut list = ChatList::default();
        list.push(msg("bob", "привет, как твои дела сегодня?"));
        let preview = chat(&list, "bob").preview();
        assert_eq!(preview.chars().count(), PREVIEW_KEEP + 3);
        assert!(preview.starts_with("привет"));
    }

    #[test]
    fn test_empty_chat_preview() {
        let chat = Chat {
            peer: "nobody".to_string(),
            messages: Vec::new(),
        };
        assert_eq!(chat.preview(), "[no messages]");
        assert!(ChatList::default().is_empty());
    }
}
