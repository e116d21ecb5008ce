use shared::domain::UserId;

/// A reply fallback split into the quoted part and the actual reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub author: UserId,
    pub quoted: String,
    pub remainder: String,
}

/// Splits a body of the form
///
/// ```text
/// > <@alice:example.org> quoted line
/// > more quoted text
///
/// the reply
/// ```
///
/// Returns `None` when the body does not carry a reply fallback.
pub fn parse_reply(raw: &str) -> Option<ParsedReply> {
    let (quote, remainder) = raw.split_once("\n\n")?;
    let mut lines = quote.lines();

    let first = lines.next()?.strip_prefix("> <")?;
    let (author, first_quoted) = first.split_once('>')?;
    if author.is_empty() {
        return None;
    }

    let mut quoted = vec![strip_one_space(first_quoted)];
    for line in lines {
        quoted.push(strip_one_space(line.strip_prefix('>')?));
    }

    Some(ParsedReply {
        author: UserId::new(author),
        quoted: quoted.join("\n"),
        remainder: remainder.to_string(),
    })
}

fn strip_one_space(line: &str) -> &str {
    line.strip_prefix(' ').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_single_line_quote() {
        let parsed = parse_reply("> <@alice:example.org> are you there?\n\nyes")
            .expect("reply fallback");
        assert_eq!(parsed.author.as_str(), "@alice:example.org");
        assert_eq!(parsed.quoted, "are you there?");
        assert_eq!(parsed.remainder, "yes");
    }

    #[test]
    fn keeps_multi_line_quote_and_remainder() {
        let parsed = parse_reply("> <@bob:example.org> line one\n> line two\n\nreply\n\nmore")
            .expect("reply fallback");
        assert_eq!(parsed.quoted, "line one\nline two");
        assert_eq!(parsed.remainder, "reply\n\nmore");
    }

    #[test]
    fn ignores_bodies_without_fallback() {
        assert!(parse_reply("just text").is_none());
        assert!(parse_reply("> quoted without author\n\nreply").is_none());
        assert!(parse_reply("> <> empty author\n\nreply").is_none());
        assert!(parse_reply("> <@a:b> quote\nnot quoted\n\nreply").is_none());
    }
}
