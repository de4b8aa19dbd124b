use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::config::MIN_POINTS_TO_SAVE;
use crate::error::{RecorderError, RecorderResult};
use crate::track::{PointOfInterest, TrackPoint};

pub const GPX_CREATOR: &str = "TripRecorder";
const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
const GPX_SCHEMA_LOCATION: &str =
    "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";

/// GPX document for mapping applications
#[derive(Debug)]
pub struct GpxDocument {
    pub name: String,
    pub time: String,
    pub waypoints: Vec<GpxWaypoint>,
    pub track_points: Vec<GpxPoint>,
}

#[derive(Debug)]
pub struct GpxWaypoint {
    pub lat: f64,
    pub lon: f64,
    pub time: Option<String>,
    pub name: Option<String>,
    pub desc: Option<String>,
}

#[derive(Debug)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub ele: Option<f64>,
    pub time: String,
}

/// Escape the five XML reserved characters.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn iso8601(timestamp_ms: i64) -> Option<String> {
    let time: DateTime<Utc> = Utc.timestamp_millis_opt(timestamp_ms).single()?;
    Some(time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn required_time(timestamp_ms: i64) -> RecorderResult<String> {
    iso8601(timestamp_ms)
        .ok_or_else(|| RecorderError::Export(format!("timestamp {} out of range", timestamp_ms)))
}

impl GpxDocument {
    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<gpx version=\"1.1\" creator=\"{}\" xmlns=\"{}\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:schemaLocation=\"{}\">\n",
            GPX_CREATOR, GPX_NAMESPACE, GPX_SCHEMA_LOCATION
        ));
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("    <time>{}</time>\n", self.time));
        xml.push_str("  </metadata>\n");

        for wpt in &self.waypoints {
            xml.push_str(&format!("  <wpt lat=\"{}\" lon=\"{}\">\n", wpt.lat, wpt.lon));
            if let Some(time) = &wpt.time {
                xml.push_str(&format!("    <time>{}</time>\n", time));
            }
            if let Some(name) = &wpt.name {
                xml.push_str(&format!("    <name>{}</name>\n", escape_xml(name)));
            }
            if let Some(desc) = &wpt.desc {
                xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(desc)));
            }
            xml.push_str("  </wpt>\n");
        }

        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!("      <trkpt lat=\"{}\" lon=\"{}\">\n", point.lat, point.lon));
            if let Some(ele) = point.ele {
                xml.push_str(&format!("        <ele>{}</ele>\n", ele));
            }
            xml.push_str(&format!("        <time>{}</time>\n", point.time));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

/// Build a GPX document from a recorded route. Needs at least two points.
pub fn create_gpx_document(
    points: &[TrackPoint],
    pois: &[PointOfInterest],
    title: &str,
) -> RecorderResult<GpxDocument> {
    if points.len() < MIN_POINTS_TO_SAVE {
        return Err(RecorderError::NotEnoughPoints);
    }

    let track_points = points
        .iter()
        .map(|p| {
            Ok(GpxPoint {
                lat: p.latitude,
                lon: p.longitude,
                ele: p.altitude_m,
                time: required_time(p.timestamp_ms)?,
            })
        })
        .collect::<RecorderResult<Vec<_>>>()?;

    let waypoints = pois
        .iter()
        .map(|poi| GpxWaypoint {
            lat: poi.latitude,
            lon: poi.longitude,
            time: iso8601(poi.timestamp_ms),
            name: poi.name.clone(),
            desc: poi.description.clone(),
        })
        .collect();

    Ok(GpxDocument {
        name: title.to_string(),
        time: track_points[0].time.clone(),
        waypoints,
        track_points,
    })
}

/// Serialize a recorded route as a GPX 1.1 document.
pub fn export_gpx(
    points: &[TrackPoint],
    pois: &[PointOfInterest],
    title: &str,
) -> RecorderResult<String> {
    Ok(create_gpx_document(points, pois, title)?.to_gpx_xml())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Vec<TrackPoint> {
        vec![
            TrackPoint::new(44.4949, 11.3426, 1_700_000_000_000).with_altitude(54.5),
            TrackPoint::new(44.4951, 11.3431, 1_700_000_005_000),
            TrackPoint::new(44.4960, 11.3440, 1_700_000_010_250).with_altitude(55.0),
        ]
    }

    fn poi(name: &str, desc: Option<&str>) -> PointOfInterest {
        PointOfInterest {
            id: Some(0),
            latitude: 44.495,
            longitude: 11.343,
            timestamp_ms: 1_700_000_004_000,
            name: Some(name.to_string()),
            description: desc.map(str::to_string),
        }
    }

    #[test]
    fn test_gpx_generation() {
        let xml = export_gpx(&route(), &[poi("Piazza Maggiore", Some("lunch"))], "Trip A").unwrap();

        assert!(xml.starts_with(concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<gpx version=\"1.1\" creator=\"TripRecorder\""
        )));
        assert!(xml.contains("xmlns=\"http://www.topografix.com/GPX/1/1\""));
        assert!(xml.contains(concat!(
            "<metadata>\n",
            "    <name>Trip A</name>\n",
            "    <time>2023-11-14T22:13:20.000Z</time>\n",
            "  </metadata>"
        )));
        assert!(xml.contains(concat!(
            "<wpt lat=\"44.495\" lon=\"11.343\">\n",
            "    <time>2023-11-14T22:13:24.000Z</time>\n",
            "    <name>Piazza Maggiore</name>\n",
            "    <desc>lunch</desc>\n",
            "  </wpt>"
        )));
        assert!(xml.contains(concat!(
            "<trkpt lat=\"44.4949\" lon=\"11.3426\">\n",
            "        <ele>54.5</ele>\n",
            "        <time>2023-11-14T22:13:20.000Z</time>"
        )));
        assert!(xml.contains("<time>2023-11-14T22:13:30.250Z</time>"));
        assert_eq!(xml.matches("<trkpt ").count(), 3);
        assert_eq!(xml.matches("<trkseg>").count(), 1);
        assert!(xml.ends_with("</gpx>\n"));
    }

    #[test]
    fn test_emission_order() {
        let pois = vec![poi("first", None), poi("second", None)];
        let xml = export_gpx(&route(), &pois, "order").unwrap();

        let metadata = xml.find("<metadata>").unwrap();
        let first = xml.find("<name>first</name>").unwrap();
        let second = xml.find("<name>second</name>").unwrap();
        let trk = xml.find("<trk>").unwrap();
        let p1 = xml.find("lat=\"44.4949\"").unwrap();
        let p3 = xml.find("lat=\"44.496\"").unwrap();
        assert!(metadata < first && first < second && second < trk && trk < p1 && p1 < p3);
    }

    #[test]
    fn test_omits_missing_altitude() {
        let xml = export_gpx(&route(), &[], "t").unwrap();
        assert_eq!(xml.matches("<ele>").count(), 2);
        assert!(!xml.contains("<ele></ele>"));
        assert!(!xml.contains("<wpt"));
    }

    #[test]
    fn test_deterministic_output() {
        let pois = vec![poi("a", Some("b"))];
        assert_eq!(
            export_gpx(&route(), &pois, "Trip A").unwrap(),
            export_gpx(&route(), &pois, "Trip A").unwrap()
        );
    }

    #[test]
    fn test_escapes_free_text() {
        let pois = [poi("Bob's \"Café\" <best>", Some("fish & chips"))];
        let xml = export_gpx(&route(), &pois, "A < B").unwrap();

        assert!(xml.contains("<name>Bob&apos;s &quot;Café&quot; &lt;best&gt;</name>"));
        assert!(xml.contains("<desc>fish &amp; chips</desc>"));
        assert!(xml.contains("<name>A &lt; B</name>"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("plain"), "plain");
        assert_eq!(escape_xml("&<>\"'"), "&amp;&lt;&gt;&quot;&apos;");
    }

    #[test]
    fn test_requires_two_points() {
        assert_eq!(export_gpx(&[], &[], "t"), Err(RecorderError::NotEnoughPoints));
        assert_eq!(export_gpx(&route()[..1], &[], "t"), Err(RecorderError::NotEnoughPoints));
    }
}
