use http::header::{self, HeaderMap};

use crate::constants;
use crate::helpers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContentDisposition {
    pub(crate) disposition: String,
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
    /// The header value as the caller set it, rendered unchanged.
    pub(crate) raw: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn new(disposition: &str) -> ContentDisposition {
        ContentDisposition {
            disposition: disposition.to_owned(),
            field_name: None,
            file_name: None,
            raw: None,
        }
    }

    pub(crate) fn parse(headers: &HeaderMap) -> ContentDisposition {
        headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|val| std::str::from_utf8(val.as_bytes()).ok())
            .map(ContentDisposition::parse_value)
            .unwrap_or_else(|| ContentDisposition::new(constants::DISPOSITION_FORM_DATA))
    }

    pub(crate) fn parse_value(val: &str) -> ContentDisposition {
        let capture = |re: &regex::Regex| {
            re.captures(val)
                .and_then(|cap| cap.get(1).or_else(|| cap.get(2)))
                .map(|m| m.as_str().to_owned())
        };

        ContentDisposition {
            disposition: capture(&*constants::CONTENT_DISPOSITION_TYPE_RE)
                .unwrap_or_else(|| constants::DISPOSITION_FORM_DATA.to_owned()),
            field_name: capture(&*constants::CONTENT_DISPOSITION_FIELD_NAME_RE),
            file_name: capture(&*constants::CONTENT_DISPOSITION_FILE_NAME_RE),
            raw: Some(val.to_owned()),
        }
    }

    pub(crate) fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }

        let mut value = self.disposition.clone();

        if let Some(name) = &self.field_name {
            value.push_str("; name=\"");
            value.push_str(&helpers::escape_param(name));
            value.push('"');
        }

        if let Some(file_name) = &self.file_name {
            value.push_str("; filename=\"");
            value.push_str(&helpers::escape_param(file_name));
            value.push('"');
        }

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_parse_value() {
        let cd = ContentDisposition::parse_value(r#"attachment; name="image"; filename="image.png""#);
        assert_eq!(cd.disposition, "attachment");
        assert_eq!(cd.field_name.as_deref(), Some("image"));
        assert_eq!(cd.file_name.as_deref(), Some("image.png"));

        let cd = ContentDisposition::parse_value(r#"attachment; filename="myimage.png""#);
        assert_eq!(cd.field_name, None);
        assert_eq!(cd.file_name.as_deref(), Some("myimage.png"));
    }

    #[test]
    fn test_parse_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(ContentDisposition::parse(&headers), ContentDisposition::new("form-data"));

        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_bytes("form-data; name=\"你好\"".as_bytes()).unwrap(),
        );
        assert_eq!(ContentDisposition::parse(&headers).field_name.as_deref(), Some("你好"));
    }

    #[test]
    fn test_render() {
        let mut cd = ContentDisposition::new("form-data");
        assert_eq!(cd.render(), "form-data");

        cd.field_name = Some("user[name]".to_owned());
        assert_eq!(cd.render(), r#"form-data; name="user[name]""#);

        cd.file_name = Some("my \"quoted\".txt".to_owned());
        assert_eq!(
            cd.render(),
            r#"form-data; name="user[name]"; filename="my %22quoted%22.txt""#
        );
        assert_eq!(ContentDisposition::parse_value(&cd.render()).field_name, cd.field_name);
    }

    #[test]
    fn test_parsed_value_renders_unchanged() {
        let raw = "form-data; name=user; filename*=UTF-8''na%C3%AFve.txt; size=4";
        let cd = ContentDisposition::parse_value(raw);

        assert_eq!(cd.field_name.as_deref(), Some("user"));
        assert_eq!(cd.file_name, None);
        assert_eq!(cd.render(), raw);
    }
}
