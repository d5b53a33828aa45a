/// Names referenced by `${...}` placeholders in a `Fn::Sub` template string, in order of
/// first appearance. `${!Literal}` escapes are skipped and `${Name.Attr}` yields `Name`.
pub fn placeholders(template: &str) -> Vec<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i + 1 < chars.len() {
        if chars[i] != '$' || chars[i + 1] != '{' {
            i += 1;
            continue;
        }
        let start = i + 2;
        let mut depth = 1;
        let mut end = start;
        while end < chars.len() {
            match chars[end] {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            end += 1;
        }
        if depth != 0 {
            // Unterminated placeholder: the rest is literal text.
            break;
        }

        let body: String = chars[start..end].iter().collect();
        if !body.starts_with('!') {
            let name = body.split('.').next().unwrap_or_default().trim().to_string();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        i = end + 1;
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("arn:${AWS::Partition}:s3:::${Bucket}/*"),
            vec!["AWS::Partition", "Bucket"]
        );
    }

    #[test]
    fn test_attribute_placeholders_use_the_name() {
        assert_eq!(placeholders("${Queue.Arn} ${Queue.QueueName}"), vec!["Queue"]);
    }

    #[test]
    fn test_escaped_and_unterminated_placeholders() {
        assert_eq!(placeholders("${!Literal} and ${Real}"), vec!["Real"]);
        assert_eq!(placeholders("cost: $5 ${Open"), Vec::<String>::new());
        assert!(placeholders("no placeholders").is_empty());
    }

    #[test]
    fn test_nested_braces_are_balanced() {
        assert_eq!(placeholders("${Name{x}}-${Other}"), vec!["Name{x}", "Other"]);
    }
}
