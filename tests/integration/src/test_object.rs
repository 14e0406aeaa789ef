//! Object read/write/copy/delete integration tests.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;
    use ruststack_s3_fs::codec::KeyCodec;
    use ruststack_s3_fs::content::{ObjectContent, collect_bytes};
    use ruststack_s3_fs::error::StoreError;
    use ruststack_s3_fs::metadata::MetadataMap;
    use ruststack_s3_fs::store::{ObjectInput, RangeRequest};
    use ruststack_s3_fs::subresource::SubresourceType;

    use crate::{TestStore, test_bucket_name};

    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    #[tokio::test]
    async fn test_should_put_and_get_object() {
        let t = TestStore::new();
        let bucket = test_bucket_name("roundtrip");
        t.store.put_bucket(&bucket).await.expect("put_bucket");

        let result = t
            .store
            .put_object(ObjectInput {
                bucket: bucket.clone(),
                key: "greeting.txt".to_owned(),
                metadata: MetadataMap::new(),
                content: ObjectContent::from("hello world"),
            })
            .await
            .expect("put_object");
        assert_eq!(result.size, 11);
        assert_eq!(result.etag, HELLO_MD5);

        let data = t.read(&bucket, "greeting.txt").await.expect("present");
        assert_eq!(&data[..], b"hello world");

        let head = t
            .store
            .head_object(&bucket, "greeting.txt")
            .await
            .expect("head")
            .expect("present");
        assert_eq!(head.etag, HELLO_MD5);
        assert_eq!(head.quoted_etag(), format!("\"{HELLO_MD5}\""));
        assert_eq!(head.content_length, 11);
        assert_eq!(head.content_type, "binary/octet-stream");
    }

    #[tokio::test]
    async fn test_should_store_streamed_content_like_whole_content() {
        let t = TestStore::new();
        let bucket = test_bucket_name("stream");

        t.put(&bucket, "whole", "hello world").await;
        let chunks = ["he", "llo", " ", "wor", "ld"]
            .into_iter()
            .map(|s| Ok::<_, std::io::Error>(Bytes::from_static(s.as_bytes())));
        t.put_with(
            &bucket,
            "streamed",
            MetadataMap::new(),
            ObjectContent::from_stream(stream::iter(chunks)),
        )
        .await;

        let whole = t.store.head_object(&bucket, "whole").await.expect("head");
        let streamed = t.store.head_object(&bucket, "streamed").await.expect("head");
        assert_eq!(
            whole.map(|m| m.etag),
            streamed.map(|m| m.etag),
            "chunking must not change the digest"
        );
        assert_eq!(
            t.read(&bucket, "whole").await,
            t.read(&bucket, "streamed").await
        );
    }

    #[tokio::test]
    async fn test_should_persist_headers_and_user_metadata() {
        let t = TestStore::new();
        let bucket = test_bucket_name("meta");
        let mut metadata = MetadataMap::new();
        metadata.insert("Content-Type".into(), "text/plain".into());
        metadata.insert("cache-control".into(), "no-cache".into());
        metadata.insert("x-amz-meta-owner".into(), "ops".into());
        metadata.insert("authorization".into(), "secret".into());
        t.put_with(&bucket, "doc", metadata, ObjectContent::from("body"))
            .await;

        let head = t
            .store
            .head_object(&bucket, "doc")
            .await
            .expect("head")
            .expect("present");
        assert_eq!(head.content_type, "text/plain");
        assert_eq!(head.headers.get("cache-control").map(String::as_str), Some("no-cache"));
        assert_eq!(head.user_metadata.get("x-amz-meta-owner").map(String::as_str), Some("ops"));
        assert!(!head.to_fields().contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_should_lay_out_files_next_to_each_other() {
        let t = TestStore::with_codec(KeyCodec::Identity);
        t.put("b", "photos/2024/cat.jpg", "meow").await;

        let dir = t.root().join("b/photos/2024");
        assert!(dir.join("cat.jpg#s3fs.object").is_file());
        let head = t
            .store
            .head_object("b", "photos/2024/cat.jpg")
            .await
            .expect("head")
            .expect("present");
        assert_eq!(
            std::fs::read_to_string(dir.join("cat.jpg#s3fs.object.md5")).expect("read digest"),
            head.etag
        );
        assert!(dir.join("cat.jpg#s3fs.metadata.json").is_file());
    }

    #[tokio::test]
    async fn test_should_escape_reserved_characters_in_file_names() {
        let t = TestStore::with_codec(KeyCodec::Escaped);
        t.put("b", "dir:1/what?.txt", "q").await;

        assert!(t.root().join("b/dir%3A1/what%3F.txt#s3fs.object").is_file());
        let data = t.read("b", "dir:1/what?.txt").await.expect("present");
        assert_eq!(&data[..], b"q");

        let listing = t
            .store
            .list_objects("b", &Default::default())
            .await
            .expect("list");
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["dir:1/what?.txt"]);
    }

    #[tokio::test]
    async fn test_should_read_clamped_range() {
        let t = TestStore::new();
        t.put("b", "k", "0123456789").await;

        let read = t
            .store
            .get_object("b", "k", Some(RangeRequest::new(5, 20)))
            .await
            .expect("get")
            .expect("present");
        let range = read.range.expect("range reported");
        assert!(range.satisfiable);
        assert_eq!((range.start, range.end), (5, 9));
        assert_eq!(range.len(), 5);
        let data = collect_bytes(read.content.expect("content"))
            .await
            .expect("collect");
        assert_eq!(&data[..], b"56789");
    }

    #[tokio::test]
    async fn test_should_report_unsatisfiable_range() {
        let t = TestStore::new();
        t.put("b", "k", "0123456789").await;

        let read = t
            .store
            .get_object("b", "k", Some(RangeRequest::new(20, 30)))
            .await
            .expect("get")
            .expect("present");
        let range = read.range.expect("range reported");
        assert!(!range.satisfiable);
        assert!(range.is_empty());
        assert!(read.content.is_none());
        assert_eq!(read.metadata.content_length, 10);
    }

    #[tokio::test]
    async fn test_should_read_open_ended_range() {
        let t = TestStore::new();
        t.put("b", "k", "hello world").await;

        let read = t
            .store
            .get_object(
                "b",
                "k",
                Some(RangeRequest {
                    start: Some(6),
                    end: None,
                }),
            )
            .await
            .expect("get")
            .expect("present");
        let data = collect_bytes(read.content.expect("content"))
            .await
            .expect("collect");
        assert_eq!(&data[..], b"world");
    }

    #[tokio::test]
    async fn test_should_return_none_for_missing_object() {
        let t = TestStore::new();
        assert!(t.store.get_object("b", "nope", None).await.expect("get").is_none());
        assert!(t.store.head_object("b", "nope").await.expect("head").is_none());
        assert!(!t.store.exists_object("b", "nope").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_should_overwrite_object() {
        let t = TestStore::new();
        t.put("b", "k", "first version").await;
        t.put("b", "k", "second").await;

        let data = t.read("b", "k").await.expect("present");
        assert_eq!(&data[..], b"second");
        let head = t.store.head_object("b", "k").await.expect("head").expect("present");
        assert_eq!(head.content_length, 6);
    }

    #[tokio::test]
    async fn test_should_copy_object_across_buckets() {
        let t = TestStore::new();
        let mut metadata = MetadataMap::new();
        metadata.insert("content-type".into(), "text/plain".into());
        t.put_with("src", "a.txt", metadata, ObjectContent::from("hello world"))
            .await;

        let copied = t
            .store
            .copy_object("src", "a.txt", "dst", "nested/b.txt", None)
            .await
            .expect("copy")
            .expect("source present");
        assert_eq!(copied.etag, HELLO_MD5);
        assert_eq!(copied.content_type, "text/plain");

        let data = t.read("dst", "nested/b.txt").await.expect("present");
        assert_eq!(&data[..], b"hello world");
        // The source is untouched.
        assert!(t.store.exists_object("src", "a.txt").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_should_replace_metadata_on_self_copy() {
        let t = TestStore::new();
        t.put("b", "k", "hello world").await;

        let mut replacement = MetadataMap::new();
        replacement.insert("content-type".into(), "application/json".into());
        let copied = t
            .store
            .copy_object("b", "k", "b", "k", Some(&replacement))
            .await
            .expect("copy")
            .expect("source present");
        assert_eq!(copied.content_type, "application/json");
        assert_eq!(copied.etag, HELLO_MD5);
        assert_eq!(copied.content_length, 11);
        assert_eq!(&t.read("b", "k").await.expect("present")[..], b"hello world");
    }

    #[tokio::test]
    async fn test_should_not_copy_missing_source() {
        let t = TestStore::new();
        let copied = t
            .store
            .copy_object("b", "nope", "b", "dest", None)
            .await
            .expect("copy");
        assert!(copied.is_none());
        assert!(!t.store.exists_object("b", "dest").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_should_remove_empty_directories_on_delete() {
        let t = TestStore::new();
        t.put("b", "x/y/z", "deep").await;
        assert!(t.root().join("b/x/y").is_dir());

        t.store.delete_object("b", "x/y/z").await.expect("delete");
        assert!(!t.root().join("b/x").exists());
        assert!(t.root().join("b").is_dir(), "bucket root is kept");
        // Deleting again is not an error.
        t.store.delete_object("b", "x/y/z").await.expect("delete twice");
    }

    #[tokio::test]
    async fn test_should_keep_directories_with_siblings_on_delete() {
        let t = TestStore::new();
        t.put("b", "x/y/z", "deep").await;
        t.put("b", "x/keep", "sibling").await;

        t.store.delete_object("b", "x/y/z").await.expect("delete");
        assert!(!t.root().join("b/x/y").exists());
        assert!(t.root().join("b/x").is_dir());
        assert!(t.store.exists_object("b", "x/keep").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_should_store_and_drop_subresources() {
        let t = TestStore::new();
        t.store.put_bucket("b").await.expect("put_bucket");
        t.put("b", "k", "v").await;

        let tagging = "<Tagging><TagSet/></Tagging>";
        t.store
            .put_subresource("b", "k", SubresourceType::Tagging, tagging)
            .await
            .expect("put tagging");
        t.store
            .put_subresource("b", "", SubresourceType::Cors, "<CORSConfiguration/>")
            .await
            .expect("put bucket cors");

        assert_eq!(
            t.store
                .get_subresource("b", "k", SubresourceType::Tagging)
                .await
                .expect("get")
                .as_deref(),
            Some(tagging)
        );

        // Object deletion takes its documents along; bucket documents stay.
        t.store.delete_object("b", "k").await.expect("delete");
        assert!(
            t.store
                .get_subresource("b", "k", SubresourceType::Tagging)
                .await
                .expect("get")
                .is_none()
        );
        assert!(
            t.store
                .get_subresource("b", "", SubresourceType::Cors)
                .await
                .expect("get")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_should_reject_empty_key() {
        let t = TestStore::new();
        let err = t
            .store
            .put_object(ObjectInput {
                bucket: "b".to_owned(),
                key: String::new(),
                metadata: MetadataMap::new(),
                content: ObjectContent::from("x"),
            })
            .await
            .expect_err("empty key");
        assert!(matches!(err, StoreError::InvalidKey { .. }), "gave {err:?}");
    }

    #[tokio::test]
    async fn test_should_store_keys_with_dot_and_empty_segments() {
        for codec in [KeyCodec::Identity, KeyCodec::Escaped] {
            let t = TestStore::with_codec(codec);
            let keys = ["a//b", "a/./b", "logs/../x", "..", "/lead", "dir/"];
            for key in keys {
                t.put("b", key, key).await;
            }
            for key in keys {
                let data = t.read("b", key).await.expect("present");
                assert_eq!(&data[..], key.as_bytes(), "codec {codec} key {key:?}");
                assert!(t.store.head_object("b", key).await.expect("head").is_some());
            }
            // None of them aliases a plain key.
            for plain in ["a/b", "x", "b", "lead", "dir"] {
                assert!(!t.store.exists_object("b", plain).await.expect("exists"));
            }

            let listing = t
                .store
                .list_objects("b", &Default::default())
                .await
                .expect("list");
            let listed: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
            assert_eq!(listed, vec!["..", "/lead", "a/./b", "a//b", "dir/", "logs/../x"]);

            for key in keys {
                t.store.delete_object("b", key).await.expect("delete");
                assert!(!t.store.exists_object("b", key).await.expect("exists"));
            }
            let leftovers: Vec<_> = std::fs::read_dir(t.root().join("b"))
                .expect("bucket dir")
                .collect();
            assert!(leftovers.is_empty(), "{leftovers:?}");
        }
    }

    #[tokio::test]
    async fn test_should_keep_marker_named_directory_apart_from_object() {
        for first_is_nested in [false, true] {
            let t = TestStore::new();
            let order = if first_is_nested {
                ["k#s3fs.object/x", "k"]
            } else {
                ["k", "k#s3fs.object/x"]
            };
            for key in order {
                t.put("b", key, key).await;
            }

            assert_eq!(&t.read("b", "k").await.expect("present")[..], b"k");
            assert_eq!(
                &t.read("b", "k#s3fs.object/x").await.expect("present")[..],
                b"k#s3fs.object/x"
            );
            let listing = t
                .store
                .list_objects("b", &Default::default())
                .await
                .expect("list");
            let listed: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
            assert_eq!(listed, vec!["k", "k#s3fs.object/x"]);
        }
    }
}
