/// Cookie header helpers
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use axum_extra::headers::{Cookie, HeaderMapExt};

pub const ACCESS_COOKIE: &str = "access";
pub const REFRESH_COOKIE: &str = "refresh";

/// Read one cookie from the request's Cookie header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(name).map(str::to_string))
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value: HttpOnly, SameSite=Lax, root path
pub fn build_cookie(name: &str, value: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes a cookie
pub fn expire_cookie(name: &str, secure: bool) -> String {
    build_cookie(name, "", 0, secure)
}

/// Append `Set-Cookie` headers for every cookie given
pub fn set_cookie_headers<I>(cookies: I) -> HeaderMap
where
    I: IntoIterator<Item = String>,
{
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Dropping malformed cookie header: {}", e),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn test_cookie_attributes() {
        let cookie = build_cookie(ACCESS_COOKIE, "abc", 900, false);
        assert_eq!(cookie, "access=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=900");
        let secure = build_cookie(REFRESH_COOKIE, "xyz", 60, true);
        assert!(secure.ends_with("; Secure"));
    }

    #[test]
    fn test_expire_cookie() {
        assert!(expire_cookie("sessionid", false).starts_with("sessionid=; "));
        assert!(expire_cookie("sessionid", false).contains("Max-Age=0"));
    }

    #[test]
    fn test_cookie_value_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=1; sessionid=s3cr3t; b=2"));
        assert_eq!(cookie_value(&headers, "sessionid").as_deref(), Some("s3cr3t"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_set_cookie_headers_appends() {
        let headers = set_cookie_headers(vec![
            build_cookie("a", "1", 1, false),
            build_cookie("b", "2", 1, false),
        ]);
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
    }
}
