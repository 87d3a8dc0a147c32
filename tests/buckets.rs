//! End-to-end exercises of the bucket core: readline masks, aggregate
//! composition, response parsing and framing, and arrival-boundary
//! behavior over a scripted source.

use bucketline::{
    AggregateBucket, Bucket, BucketError, HeadersBucket, IovecBucket, MockBucket, NewlineFound,
    NewlineSet, ReadStatus, ResponseBucket, SimpleBucket, READ_ALL_AVAIL,
};
use bytes::Bytes;

/// Read until `Eof`, asserting the drained bytes match `expected`.
fn read_and_check(bkt: &mut dyn Bucket, expected: &[u8]) {
    let mut out = Vec::new();
    let mut spins = 0;
    loop {
        let (data, status) = bkt.read(READ_ALL_AVAIL).expect("read failed");
        out.extend_from_slice(&data);
        match status {
            ReadStatus::Eof => break,
            ReadStatus::Ok => spins = 0,
            ReadStatus::Again | ReadStatus::WaitConn => {
                spins += 1;
                assert!(spins < 100, "bucket busy-looped without progress");
            }
        }
    }
    assert_eq!(out, expected);
}

/// Read lines until `Eof`, checking data and counting terminated lines.
fn readlines_and_check(
    bkt: &mut dyn Bucket,
    acceptable: NewlineSet,
    expected: &[u8],
    expected_lines: usize,
) {
    let mut out = Vec::new();
    let mut lines = 0;
    loop {
        let (data, found, status) = bkt.readline(acceptable).expect("readline failed");
        out.extend_from_slice(&data);
        match found {
            NewlineFound::CrlfSplit => {
                if status == ReadStatus::Eof {
                    lines += 1;
                    break;
                }
                continue;
            }
            NewlineFound::None => {
                if status == ReadStatus::Eof {
                    if !data.is_empty() {
                        lines += 1;
                    }
                    break;
                }
            }
            _ => lines += 1,
        }
        if status == ReadStatus::Eof {
            break;
        }
    }
    assert_eq!(out, expected);
    assert_eq!(lines, expected_lines);
}

#[test]
fn simple_readline_crlf() {
    let mut bkt = SimpleBucket::from_static(b"line1\r\nline2");

    let (data, found, status) = bkt.readline(NewlineSet::CRLF).unwrap();
    assert_eq!(&data[..], b"line1\r\n");
    assert_eq!(data.len(), 7);
    assert_eq!(found, NewlineFound::Crlf);
    assert_eq!(status, ReadStatus::Ok);

    let (data, found, status) = bkt.readline(NewlineSet::CRLF).unwrap();
    assert_eq!(&data[..], b"line2");
    assert_eq!(found, NewlineFound::None);
    assert_eq!(status, ReadStatus::Eof);
}

#[test]
fn readline_masks() {
    // Acceptable line types are reported.
    let mut bkt = SimpleBucket::from_static(b"line1\r\n");
    readlines_and_check(&mut bkt, NewlineSet::CRLF, b"line1\r\n", 1);

    let mut bkt = SimpleBucket::from_static(b"line1\n");
    readlines_and_check(&mut bkt, NewlineSet::LF, b"line1\n", 1);

    // A CR-only scan sees the CR of a CRLF, then the dangling LF.
    let mut bkt = SimpleBucket::from_static(b"line1\r\n");
    readlines_and_check(&mut bkt, NewlineSet::CR, b"line1\r\n", 2);

    // An LF-only scan runs through the CR.
    let mut bkt = SimpleBucket::from_static(b"line1\r\n");
    readlines_and_check(&mut bkt, NewlineSet::LF, b"line1\r\n", 1);

    // Unacceptable line types are not reported.
    let mut bkt = SimpleBucket::from_static(b"line1\n");
    readlines_and_check(&mut bkt, NewlineSet::CR, b"line1\n", 1);
    let mut bkt = SimpleBucket::from_static(b"line1\n");
    readlines_and_check(&mut bkt, NewlineSet::CRLF, b"line1\n", 1);
    let mut bkt = SimpleBucket::from_static(b"line1\r");
    readlines_and_check(&mut bkt, NewlineSet::LF, b"line1\r", 1);

    let body: &[u8] = b"12345678901234567890\r\n12345678901234567890\r\n12345678901234567890\r\n";
    let mut bkt = SimpleBucket::from_static(body);
    readlines_and_check(&mut bkt, NewlineSet::LF, body, 3);
}

#[test]
fn aggregate_content_equals_parts() {
    let body: &[u8] = b"123456789012345678901234567890123456789012345678901234567890\r\n";

    let mut agg = AggregateBucket::new();
    agg.append(Box::new(SimpleBucket::from_static(&body[..15])));
    agg.append(Box::new(SimpleBucket::from_static(&body[15..])));
    read_and_check(&mut agg, body);

    let mut agg = AggregateBucket::new();
    agg.prepend(Box::new(SimpleBucket::from_static(&body[15..])));
    agg.prepend(Box::new(SimpleBucket::from_static(&body[..15])));
    read_and_check(&mut agg, body);
}

#[test]
fn aggregate_readline_across_children() {
    let body: &[u8] = b"12345678901234567890\r\n12345678901234567890\r\n12345678901234567890\r\n";

    let mut agg = AggregateBucket::new();
    agg.append(Box::new(SimpleBucket::from_static(&body[..22])));
    agg.append(Box::new(SimpleBucket::from_static(&body[22..])));
    readlines_and_check(&mut agg, NewlineSet::CRLF, body, 3);

    // A leading empty child must not disturb line accounting.
    let mut agg = AggregateBucket::new();
    agg.append(Box::new(SimpleBucket::from_static(b"")));
    agg.append(Box::new(SimpleBucket::from_static(&body[..22])));
    agg.append(Box::new(SimpleBucket::from_static(&body[22..])));
    readlines_and_check(&mut agg, NewlineSet::CRLF, body, 3);
}

#[test]
fn iovec_bucket_from_iovec_read() {
    let mut src = SimpleBucket::from_static(b"line1\r\nline2");
    let mut vecs = Vec::new();
    let status = src.read_iovec(READ_ALL_AVAIL, 32, &mut vecs).unwrap();
    assert_eq!(status, ReadStatus::Eof);

    let mut iobkt = IovecBucket::new(vecs);
    let (data, status) = iobkt.peek().unwrap();
    assert_eq!(data.len(), b"line1\r\nline2".len());
    assert_eq!(status, ReadStatus::Eof);

    let mut vecs = Vec::new();
    let status = iobkt.read_iovec(3, 32, &mut vecs).unwrap();
    assert_eq!(status, ReadStatus::Ok);
    assert_eq!(vecs.len(), 1);
    assert_eq!(&vecs[0][..], b"lin");

    let mut vecs = Vec::new();
    let status = iobkt.read_iovec(READ_ALL_AVAIL, 32, &mut vecs).unwrap();
    assert_eq!(status, ReadStatus::Eof);
    let flat: Vec<u8> = vecs.iter().flat_map(|b| b.to_vec()).collect();
    assert_eq!(flat, b"e1\r\nline2");

    let (data, status) = iobkt.peek().unwrap();
    assert!(data.is_empty());
    assert_eq!(status, ReadStatus::Eof);
}

#[test]
fn headers_multi_set_and_wire_form() {
    let mut hdrs = HeadersBucket::new();
    hdrs.set("Foo", "bar");
    hdrs.set("Foo", "baz");
    hdrs.set("Foo", "test");
    assert_eq!(hdrs.get("fOo"), Some("bar,baz,test"));

    let mut hdrs = HeadersBucket::new();
    hdrs.set("Content-Type", "text/plain");
    hdrs.set("Content-Length", "100");
    read_and_check(
        &mut hdrs,
        b"Content-Type: text/plain\r\nContent-Length: 100\r\n\r\n",
    );
}

#[test]
fn response_with_content_length() {
    let raw = SimpleBucket::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nabc1234");
    let mut bkt = ResponseBucket::new(Box::new(raw));
    read_and_check(&mut bkt, b"abc1234");
}

#[test]
fn response_header_values() {
    let raw = SimpleBucket::from_static(
        b"HTTP/1.1 405 Method Not Allowed\r\n\
          Date: Sat, 12 Jun 2010 14:17:10 GMT\r\n\
          Server: Apache\r\n\
          Allow: \r\n\
          Content-Length: 7\r\n\
          Content-Type: text/html; charset=iso-8859-1\r\n\
          NoSpace:\r\n\
          \r\n\
          abc1234",
    );
    let mut bkt = ResponseBucket::new(Box::new(raw));
    read_and_check(&mut bkt, b"abc1234");

    let hdrs = bkt.headers().expect("headers parsed");
    assert_eq!(hdrs.get("Allow"), Some(""));
    assert_eq!(hdrs.get("Content-Length"), Some("7"));
    assert_eq!(hdrs.get("NoSpace"), Some(""));
}

#[test]
fn response_chunked_with_trailer() {
    let raw = SimpleBucket::from_static(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          3\r\nabc\r\n4\r\n1234\r\n0\r\nFooter: value\r\n\r\n",
    );
    let mut bkt = ResponseBucket::new(Box::new(raw));
    read_and_check(&mut bkt, b"abc1234");
    assert_eq!(bkt.headers().unwrap().get("Footer"), Some("value"));
}

#[test]
fn response_body_too_small_content_length() {
    let body: &[u8] = b"123456789012345678901234567890123456789012345678901234567890";
    let raw = [
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\n".to_vec(),
        body.to_vec(),
    ]
    .concat();
    let mut bkt = ResponseBucket::new(Box::new(SimpleBucket::own(raw)));

    // The available bytes come out first; the truncation follows.
    let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
    assert_eq!(&data[..], body);
    assert_eq!(status, ReadStatus::Ok);
    assert_eq!(
        bkt.read(READ_ALL_AVAIL).unwrap_err(),
        BucketError::TruncatedHttpResponse
    );
}

#[test]
fn response_body_too_small_chunked() {
    let raw = SimpleBucket::from_static(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n\
          64\r\n123456789012345678901234567890123456789012345678901234567890",
    );
    let mut bkt = ResponseBucket::new(Box::new(raw));

    let mut out = Vec::new();
    let err = loop {
        match bkt.read(READ_ALL_AVAIL) {
            Ok((data, _)) => out.extend_from_slice(&data),
            Err(err) => break err,
        }
    };
    assert_eq!(
        out,
        b"123456789012345678901234567890123456789012345678901234567890"
    );
    assert_eq!(err, BucketError::TruncatedHttpResponse);
}

#[test]
fn response_chunked_missing_payload_crlf() {
    let raw = SimpleBucket::from_static(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nAB",
    );
    let mut bkt = ResponseBucket::new(Box::new(raw));
    let err = loop {
        match bkt.read(READ_ALL_AVAIL) {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err, BucketError::TruncatedHttpResponse);
}

#[test]
fn response_chunked_split_payload_crlf() {
    let raw = SimpleBucket::from_static(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nAB\r",
    );
    let mut bkt = ResponseBucket::new(Box::new(raw));
    let err = loop {
        match bkt.read(READ_ALL_AVAIL) {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err, BucketError::TruncatedHttpResponse);
}

#[test]
fn response_peek_at_headers_then_become_aggregate() {
    let raw: &[u8] = b"HTTP/1.1 200 OK\r\n\
                       Content-Type: text/plain\r\n\
                       Content-Length: 100\r\n\
                       \r\n\
                       123456789012345678901234567890123456789012345678901234567890";
    let mut bkt = ResponseBucket::new(Box::new(SimpleBucket::from_static(raw)));

    let sl = bkt.status().unwrap().expect("status line complete");
    assert_eq!(sl.code, 200);
    assert_eq!(sl.reason, "OK");
    assert_eq!(sl.version, 1001);

    assert_eq!(bkt.wait_for_headers().unwrap(), ReadStatus::Ok);
    let hdrs = bkt.headers().expect("headers parsed");
    assert_eq!(hdrs.get("Content-Type"), Some("text/plain"));
    assert_eq!(hdrs.get("Content-Length"), Some("100"));

    // Re-emit the whole response as raw bytes, remaining stream included.
    assert_eq!(bkt.become_aggregate().unwrap(), ReadStatus::Ok);
    read_and_check(&mut bkt, raw);
}

#[test]
fn response_split_crlf_across_arrivals() {
    // The chunk-size CRLF is split across two arrivals with a stall in
    // between; the response must deliver the body without busy-looping.
    let mock = MockBucket::new()
        .deliver("HTTP/1.1 200 OK\r\n")
        .deliver("Content-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n")
        .deliver("6\r")
        .stall()
        .deliver("\nblabla\r\n\r\n");
    let mut bkt = ResponseBucket::new(Box::new(mock));
    read_and_check(&mut bkt, b"blabla");
}

#[test]
fn response_reads_before_body_report_again() {
    let mock = MockBucket::new()
        .stall()
        .deliver("HTTP/1.1 200 OK\r\n")
        .stall()
        .deliver("Content-Length: 3\r\n\r\nxyz");
    let mut bkt = ResponseBucket::new(Box::new(mock));

    let (data, status) = bkt.read(READ_ALL_AVAIL).unwrap();
    assert!(data.is_empty());
    assert_eq!(status, ReadStatus::Again);

    read_and_check(&mut bkt, b"xyz");
}

#[test]
fn drained_content_is_returned_exactly_once() {
    // Reading in odd-sized pieces covers the same bytes exactly once.
    let payload = Bytes::from(vec![0x5a; 1000]);
    let mut agg = AggregateBucket::new();
    agg.append(Box::new(SimpleBucket::own(payload.clone())));
    agg.append(Box::new(SimpleBucket::own(payload.clone())));

    let mut total = 0;
    loop {
        let (data, status) = agg.read(7).unwrap();
        assert!(data.iter().all(|&b| b == 0x5a));
        total += data.len();
        if status == ReadStatus::Eof {
            break;
        }
    }
    assert_eq!(total, 2000);
}
