use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

pub const MEETUP_ICS: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
X-WR-TIMEZONE:Europe/Paris\r
BEGIN:VEVENT\r
UID:event_305500001@meetup.com\r
SUMMARY:Rust Toulouse #12\r
DTSTART;TZID=Europe/Paris:20250115T190000\r
LOCATION:La Cantine\\, Toulouse\r
URL;VALUE=URI:https://www.meetup.com/toulouse-rust/events/305500001/\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event_305500002@meetup.com\r
SUMMARY:Apéro Rust d'hiver\r
DTSTART:20241220T180000Z\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event_305500003@meetup.com\r
SUMMARY:Rust au printemps\r
DTSTART:20250301T180000Z\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event_305500004@meetup.com\r
SUMMARY:Atelier async\r
DTSTART:20250108T180000Z\r
END:VEVENT\r
END:VCALENDAR\r
";

pub const AGENDA_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Agenda</title>
<item>
  <title>Grand Concert de Jazz</title>
  <link>https://www.toulouse.fr/agenda/grand-concert-de-jazz</link>
  <pubDate>Fri, 10 Jan 2025 20:30:00 +0100</pubDate>
  <description><![CDATA[<p>Soirée au <b>Bikini</b></p>]]></description>
</item>
<item>
  <title>Atelier async</title>
  <link>https://www.toulouse.fr/agenda/atelier-async</link>
  <pubDate>Wed, 08 Jan 2025 19:00:00 +0100</pubDate>
</item>
</channel></rss>"#;

pub const THEATRE_JSON: &str = r#"{
  "spectacles": [
    { "id": "cite-1", "title": "Le Misanthrope", "url": "/spectacles/misanthrope",
      "start": "2025-01-12T20:00:00", "venue": "Grande salle" },
    { "id": "cite-2", "title": "Relâche" }
  ]
}"#;

/// Serves canned feed bodies on an ephemeral local port and returns its
/// base url. `/missing` answers 404.
pub async fn spawn_upstream() -> String {
    let app = Router::new()
        .route(
            "/meetup.ics",
            get(|| async { ([(header::CONTENT_TYPE, "text/calendar")], MEETUP_ICS) }),
        )
        .route(
            "/agenda.xml",
            get(|| async { ([(header::CONTENT_TYPE, "application/rss+xml")], AGENDA_RSS) }),
        )
        .route(
            "/theatre.json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], THEATRE_JSON) }),
        )
        .route("/broken.xml", get(|| async { "<html>maintenance</html>" }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("upstream server");
    });
    format!("http://{addr}")
}

/// An address nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}/feed")
}
