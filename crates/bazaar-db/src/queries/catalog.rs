use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::models::{
    CategoryChanges, CategoryRow, ImageRow, NewProduct, PageRequest, ProductChanges, ProductView,
};
use crate::queries::{PRODUCT_SELECT, placeholders, price_to_sql, product_from_row};
use crate::{Database, DbError};

/// ASCII slug: lowercase alphanumerics, with every run of whitespace,
/// hyphens or underscores collapsed to a single `-`. Other characters drop.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }

    slug
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<CategoryRow> {
    Ok(CategoryRow {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        image: row.get(3)?,
    })
}

fn map_slug_conflict(slug: &str) -> impl FnOnce(rusqlite::Error) -> DbError + '_ {
    move |e| {
        if DbError::is_constraint_violation(&e) {
            DbError::Conflict(format!("category with slug '{}' already exists", slug))
        } else {
            e.into()
        }
    }
}

impl Database {
    // -- Categories --

    /// Insert a category. An absent or blank slug is derived from the name.
    pub fn create_category(&self, name: &str, slug: Option<&str>) -> Result<CategoryRow, DbError> {
        let slug = match slug.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => slugify(name),
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO categories (name, slug) VALUES (?1, ?2)",
                (name, &slug),
            )
            .map_err(map_slug_conflict(&slug))?;

            Ok(CategoryRow {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                slug: slug.clone(),
                image: String::new(),
            })
        })
    }

    pub fn get_category(&self, id: i64) -> Result<Option<CategoryRow>, DbError> {
        self.with_conn(|conn| query_category(conn, id))
    }

    pub fn get_category_by_slug(&self, slug: &str) -> Result<Option<CategoryRow>, DbError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, slug, image FROM categories WHERE slug = ?1",
                    [slug],
                    category_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_categories(&self, page: PageRequest) -> Result<(Vec<CategoryRow>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))?;
            let mut stmt = conn.prepare(
                "SELECT id, name, slug, image FROM categories ORDER BY name, id LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map([page.limit as i64, page.offset as i64], category_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    pub fn update_category(&self, id: i64, changes: &CategoryChanges) -> Result<CategoryRow, DbError> {
        self.with_tx(|tx| {
            let current = query_category(tx, id)?.ok_or(DbError::NotFound("Category"))?;
            let name = changes.name.clone().unwrap_or(current.name);
            let slug = match changes.slug.as_deref().map(str::trim) {
                Some(s) if !s.is_empty() => s.to_string(),
                Some(_) => slugify(&name),
                None => current.slug,
            };

            tx.execute(
                "UPDATE categories SET name = ?2, slug = ?3 WHERE id = ?1",
                rusqlite::params![id, name, slug],
            )
            .map_err(map_slug_conflict(&slug))?;

            query_category(tx, id)?.ok_or(DbError::NotFound("Category"))
        })
    }

    /// Returns the previous image path, if any.
    pub fn set_category_image(&self, id: i64, path: &str) -> Result<String, DbError> {
        self.with_tx(|tx| {
            let current = query_category(tx, id)?.ok_or(DbError::NotFound("Category"))?;
            tx.execute(
                "UPDATE categories SET image = ?2 WHERE id = ?1",
                rusqlite::params![id, path],
            )?;
            Ok(current.image)
        })
    }

    /// Deletes the category and, by cascade, its products.
    pub fn delete_category(&self, id: i64) -> Result<(), DbError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM categories WHERE id = ?1", [id])?;
            if deleted == 0 {
                return Err(DbError::NotFound("Category"));
            }
            info!(category_id = id, "Deleted category");
            Ok(())
        })
    }

    // -- Products --

    pub fn create_product(&self, new: &NewProduct<'_>) -> Result<i64, DbError> {
        self.with_tx(|tx| {
            if query_category(tx, new.category_id)?.is_none() {
                return Err(DbError::NotFound("Category"));
            }
            tx.execute(
                "INSERT INTO products (category_id, name, description, price, stock, brand, model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    new.category_id,
                    new.name,
                    new.description,
                    price_to_sql(new.price),
                    new.stock,
                    new.brand,
                    new.model
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn get_product(&self, viewer: Option<i64>, id: i64) -> Result<Option<ProductView>, DbError> {
        self.with_conn(|conn| query_product(conn, viewer, id))
    }

    pub fn list_products(
        &self,
        viewer: Option<i64>,
        category: Option<i64>,
        page: PageRequest,
    ) -> Result<(Vec<ProductView>, u64), DbError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM products WHERE ?1 IS NULL OR category_id = ?1",
                [category],
                |r| r.get(0),
            )?;

            let sql = format!(
                "{} WHERE ?2 IS NULL OR p.category_id = ?2 ORDER BY p.id LIMIT ?3 OFFSET ?4",
                PRODUCT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer, category, page.limit as i64, page.offset as i64],
                    product_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total as u64))
        })
    }

    /// Batch-fetch hydrated products. Missing ids are skipped.
    pub fn get_products_by_ids(
        &self,
        viewer: Option<i64>,
        ids: &[i64],
    ) -> Result<Vec<ProductView>, DbError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE p.id IN ({})",
                PRODUCT_SELECT,
                placeholders(2, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
            params.push(&viewer);
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::ToSql));

            let rows = stmt
                .query_map(params.as_slice(), product_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_product(&self, id: i64, changes: &ProductChanges) -> Result<(), DbError> {
        self.with_tx(|tx| {
            if let Some(category_id) = changes.category_id {
                if query_category(tx, category_id)?.is_none() {
                    return Err(DbError::NotFound("Category"));
                }
            }

            let updated = tx.execute(
                "UPDATE products SET
                    category_id = COALESCE(?2, category_id),
                    name        = COALESCE(?3, name),
                    description = COALESCE(?4, description),
                    price       = COALESCE(?5, price),
                    stock       = COALESCE(?6, stock),
                    brand       = COALESCE(?7, brand),
                    model       = COALESCE(?8, model)
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.category_id,
                    changes.name,
                    changes.description,
                    changes.price.map(price_to_sql),
                    changes.stock,
                    changes.brand,
                    changes.model
                ],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound("Product"));
            }
            Ok(())
        })
    }

    /// Deletes the product; returns the paths of its images so the caller can
    /// remove the files.
    pub fn delete_product(&self, id: i64) -> Result<Vec<String>, DbError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("SELECT path FROM images WHERE product_id = ?1")?;
            let paths = stmt
                .query_map([id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            let deleted = tx.execute("DELETE FROM products WHERE id = ?1", [id])?;
            if deleted == 0 {
                return Err(DbError::NotFound("Product"));
            }
            info!(product_id = id, "Deleted product");
            Ok(paths)
        })
    }

    // -- Images --

    pub fn add_product_image(&self, product_id: i64, path: &str, order: u32) -> Result<ImageRow, DbError> {
        self.with_tx(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)",
                [product_id],
                |r| r.get(0),
            )?;
            if !exists {
                return Err(DbError::NotFound("Product"));
            }

            tx.execute(
                "INSERT INTO images (product_id, path, sort_order) VALUES (?1, ?2, ?3)",
                rusqlite::params![product_id, path, order],
            )?;
            Ok(ImageRow {
                id: tx.last_insert_rowid(),
                product_id,
                path: path.to_string(),
                order,
            })
        })
    }

    /// Returns the removed image's path.
    pub fn delete_product_image(&self, product_id: i64, image_id: i64) -> Result<String, DbError> {
        self.with_tx(|tx| {
            let path: String = tx
                .query_row(
                    "SELECT path FROM images WHERE id = ?1 AND product_id = ?2",
                    [image_id, product_id],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(DbError::NotFound("Image"))?;
            tx.execute("DELETE FROM images WHERE id = ?1", [image_id])?;
            Ok(path)
        })
    }

    /// Images for a set of products, each product's images in display order.
    pub fn get_images_for_products(&self, product_ids: &[i64]) -> Result<Vec<ImageRow>, DbError> {
        if product_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, product_id, path, sort_order FROM images
                 WHERE product_id IN ({})
                 ORDER BY product_id, sort_order, id",
                placeholders(1, product_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = product_ids
                .iter()
                .map(|id| id as &dyn rusqlite::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ImageRow {
                        id: row.get(0)?,
                        product_id: row.get(1)?,
                        path: row.get(2)?,
                        order: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_category(conn: &Connection, id: i64) -> Result<Option<CategoryRow>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, name, slug, image FROM categories WHERE id = ?1",
            [id],
            category_from_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn query_product(
    conn: &Connection,
    viewer: Option<i64>,
    id: i64,
) -> Result<Option<ProductView>, DbError> {
    let sql = format!("{} WHERE p.id = ?2", PRODUCT_SELECT);
    let row = conn
        .query_row(&sql, rusqlite::params![viewer, id], product_from_row)
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use rust_decimal::Decimal;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Home & Garden"), "home-garden");
        assert_eq!(slugify("  Phones -- Tablets_2024 "), "phones-tablets-2024");
        assert_eq!(slugify("Électronique"), "lectronique");
    }

    #[test]
    fn category_slug_is_derived_when_absent() {
        let db = Database::open_in_memory().unwrap();
        let cat = db.create_category("Kitchen Tools", None).unwrap();
        assert_eq!(cat.slug, "kitchen-tools");

        let explicit = db.create_category("Other", Some("misc")).unwrap();
        assert_eq!(explicit.slug, "misc");

        let err = db.create_category("Kitchen  Tools", None).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn categories_list_in_name_order() {
        let db = Database::open_in_memory().unwrap();
        db.create_category("Toys", None).unwrap();
        db.create_category("Books", None).unwrap();
        db.create_category("Music", None).unwrap();

        let (rows, total) = db
            .list_categories(PageRequest { limit: 2, offset: 0 })
            .unwrap();
        assert_eq!(total, 3);
        let names: Vec<_> = rows.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Books", "Music"]);
    }

    #[test]
    fn product_view_reports_likes_relative_to_viewer() {
        let db = Database::open_in_memory().unwrap();
        let alice = fixtures::user(&db, "alice");
        let bob = fixtures::user(&db, "bob");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        db.like_product(alice, product).unwrap();

        let seen_by_alice = db.get_product(Some(alice), product).unwrap().unwrap();
        assert!(seen_by_alice.is_liked);
        assert_eq!(seen_by_alice.like_count, 1);
        assert_eq!(seen_by_alice.price, Decimal::new(1999, 2));

        let seen_by_bob = db.get_product(Some(bob), product).unwrap().unwrap();
        assert!(!seen_by_bob.is_liked);
        assert_eq!(seen_by_bob.like_count, 1);

        let anonymous = db.get_product(None, product).unwrap().unwrap();
        assert!(!anonymous.is_liked);
    }

    #[test]
    fn products_filter_by_category() {
        let db = Database::open_in_memory().unwrap();
        fixtures::product(&db, "Kettle", "19.99", 5);
        let books = db.create_category("Books", None).unwrap();
        db.create_product(&NewProduct {
            category_id: books.id,
            name: "Novel",
            description: "",
            price: Decimal::new(900, 2),
            stock: 3,
            brand: "Press",
            model: "PB",
        })
        .unwrap();

        let (all, total) = db.list_products(None, None, PageRequest::all()).unwrap();
        assert_eq!((all.len(), total), (2, 2));

        let (only_books, total) = db
            .list_products(None, Some(books.id), PageRequest::all())
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(only_books[0].name, "Novel");
    }

    #[test]
    fn product_in_missing_category_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .create_product(&NewProduct {
                category_id: 42,
                name: "Ghost",
                description: "",
                price: Decimal::ONE,
                stock: 1,
                brand: "",
                model: "",
            })
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound("Category")));
    }

    #[test]
    fn update_product_keeps_unspecified_fields() {
        let db = Database::open_in_memory().unwrap();
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        db.update_product(
            product,
            &ProductChanges {
                price: Some(Decimal::new(2500, 2)),
                ..Default::default()
            },
        )
        .unwrap();

        let view = db.get_product(None, product).unwrap().unwrap();
        assert_eq!(view.price, Decimal::new(25, 0));
        assert_eq!(view.name, "Kettle");
        assert_eq!(view.stock, 5);
    }

    #[test]
    fn negative_stock_is_refused_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let product = fixtures::product(&db, "Kettle", "19.99", 5);

        let err = db
            .update_product(
                product,
                &ProductChanges {
                    stock: Some(-1),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Sqlite(_)));
    }

    #[test]
    fn images_come_back_in_display_order() {
        let db = Database::open_in_memory().unwrap();
        let product = fixtures::product(&db, "Kettle", "19.99", 5);
        db.add_product_image(product, "product/images/b.png", 2).unwrap();
        let first = db.add_product_image(product, "product/images/a.png", 0).unwrap();
        db.add_product_image(product, "product/images/c.png", 2).unwrap();

        let images = db.get_images_for_products(&[product]).unwrap();
        let paths: Vec<_> = images.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            ["product/images/a.png", "product/images/b.png", "product/images/c.png"]
        );

        assert_eq!(db.delete_product_image(product, first.id).unwrap(), "product/images/a.png");
        assert!(matches!(
            db.delete_product_image(product, first.id),
            Err(DbError::NotFound("Image"))
        ));
    }

    #[test]
    fn deleting_category_cascades_to_products() {
        let db = Database::open_in_memory().unwrap();
        let product = fixtures::product(&db, "Kettle", "19.99", 5);
        let category = db.get_product(None, product).unwrap().unwrap().category.id;

        db.delete_category(category).unwrap();
        assert!(db.get_product(None, product).unwrap().is_none());
        assert!(matches!(db.delete_category(category), Err(DbError::NotFound(_))));
    }
}
