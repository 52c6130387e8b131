//! POSIX shell quoting for command lines handed to `/bin/sh -c`

/// Quote one word; safe words pass through untouched
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

/// Quote every word and join with spaces
pub fn join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// CRLF/CR to LF, always ending in a newline
pub fn normalize_script(body: &str) -> String {
    let mut script = body.replace("\r\n", "\n").replace('\r', "\n");
    if !script.ends_with('\n') {
        script.push('\n');
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain-word_1.txt"), "plain-word_1.txt");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_quoted_words_survive_the_shell() {
        let words = ["printf", "%s|", "a b", "it's", "$x"];
        let output = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(join(&words))
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "a b|it's|$x|");
    }

    #[test]
    fn test_normalize_script() {
        assert_eq!(normalize_script("a\r\nb\rc"), "a\nb\nc\n");
        assert_eq!(normalize_script("x\n"), "x\n");
    }
}
