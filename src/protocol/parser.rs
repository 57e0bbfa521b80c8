use std::str::SplitWhitespace;

use super::error::ProtocolError;
use super::{Message, MessageKind, Result};
use crate::vote::{ParticipantId, Vote};

pub struct MessageParser;

impl MessageParser {
    pub fn parse(line: &str, expected: MessageKind) -> Result {
        let mut tokens = line.split_whitespace();

        let tag = tokens.next().ok_or_else(ProtocolError::empty_input)?;
        let found = MessageKind::from_tag(tag).ok_or_else(|| ProtocolError::unknown_kind(tag))?;

        if found != expected {
            return Err(ProtocolError::unexpected_kind(expected, found));
        }

        match found {
            MessageKind::Join => MessageParser::parse_join(tokens),
            MessageKind::Details => MessageParser::parse_details(tokens),
            MessageKind::VoteOptions => MessageParser::parse_vote_options(tokens),
            MessageKind::Vote => MessageParser::parse_votes(tokens),
            MessageKind::Outcome => MessageParser::parse_outcome(tokens),
        }
    }

    fn parse_participant(token: &str) -> std::result::Result<ParticipantId, ProtocolError> {
        Ok(token.parse::<ParticipantId>()?)
    }

    fn parse_participants(
        tokens: SplitWhitespace,
    ) -> std::result::Result<Vec<ParticipantId>, ProtocolError> {
        tokens.map(MessageParser::parse_participant).collect()
    }

    pub fn parse_join(mut tokens: SplitWhitespace) -> Result {
        let participant_id = tokens
            .next()
            .ok_or_else(ProtocolError::missing_token)
            .and_then(MessageParser::parse_participant)?;

        match tokens.next() {
            Some(token) => Err(ProtocolError::trailing_token(token)),
            None => Ok(Message::Join(participant_id)),
        }
    }

    pub fn parse_details(tokens: SplitWhitespace) -> Result {
        MessageParser::parse_participants(tokens).map(Message::Details)
    }

    pub fn parse_vote_options(tokens: SplitWhitespace) -> Result {
        let options = tokens.map(|token| token.to_string()).collect::<Vec<_>>();

        if options.is_empty() {
            return Err(ProtocolError::missing_token());
        }

        Ok(Message::VoteOptions(options))
    }

    pub fn parse_votes(mut tokens: SplitWhitespace) -> Result {
        let mut votes = vec![];

        while let Some(participant_id) = tokens.next() {
            let participant_id = MessageParser::parse_participant(participant_id)?;
            let value = tokens.next().ok_or_else(ProtocolError::missing_token)?;
            votes.push(Vote::new(participant_id, value));
        }

        Ok(Message::Vote(votes))
    }

    pub fn parse_outcome(mut tokens: SplitWhitespace) -> Result {
        let value = tokens.next().ok_or_else(ProtocolError::missing_token)?;
        let voters = MessageParser::parse_participants(tokens)?;

        Ok(Message::Outcome {
            value: value.to_string(),
            voters,
        })
    }
}
